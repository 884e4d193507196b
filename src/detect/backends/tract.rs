#![cfg(feature = "backend-tract")]

use std::path::Path;

use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::detector::{
    DetectError, Detection, ObjectDetector, StrategyKind, LABEL_PERSON,
};
use crate::geometry::BoundingBox;

/// Class names of the specialized construction-site PPE model.
pub const PPE_CLASS_NAMES: [&str; 10] = [
    "Hardhat",
    "Mask",
    "NO-Hardhat",
    "NO-Mask",
    "NO-Safety Vest",
    "Person",
    "Safety Cone",
    "Safety Vest",
    "machinery",
    "vehicle",
];

/// COCO class id for "person", used by the generic fallback model.
pub const COCO_PERSON_CLASS_ID: usize = 0;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based ONNX detector decoding YOLO-style `[1, 4+nc, anchors]` output.
///
/// The input image is stretch-resized to the model's square input; boxes are
/// scaled back to original pixel coordinates. Local model file only, no
/// network I/O.
pub struct TractDetector {
    model: OnnxPlan,
    input_size: u32,
    class_names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
    source: StrategyKind,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
        confidence_threshold: f32,
        iou_threshold: f32,
        source: StrategyKind,
    ) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| {
                anyhow::anyhow!("failed to load ONNX model from {}: {}", model_path.display(), e)
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            input_size,
            class_names,
            confidence_threshold,
            iou_threshold,
            source,
        })
    }

    /// Detector over the specialized PPE label set.
    pub fn specialized<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> anyhow::Result<Self> {
        Self::new(
            model_path,
            input_size,
            PPE_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            confidence_threshold,
            iou_threshold,
            StrategyKind::Specialized,
        )
    }

    /// Generic COCO detector; only the "person" class name is mapped, the
    /// rest decode as `class_<id>` and are filtered out downstream.
    pub fn person<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> anyhow::Result<Self> {
        let mut names = vec![String::new(); COCO_PERSON_CLASS_ID + 1];
        names[COCO_PERSON_CLASS_ID] = LABEL_PERSON.to_string();
        Self::new(
            model_path,
            input_size,
            names,
            confidence_threshold,
            iou_threshold,
            StrategyKind::PersonModel,
        )
    }

    fn class_name(&self, id: usize) -> String {
        match self.class_names.get(id) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("class_{}", id),
        }
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(&self, output: &Tensor, orig_w: u32, orig_h: u32) -> Result<Vec<Detection>, DetectError> {
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectError::Inference(format!("output tensor was not f32: {}", e)))?;
        let shape = view.shape();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(DetectError::Inference(format!(
                "unexpected output shape {:?}",
                shape
            )));
        }
        let num_classes = shape[1] - 4;
        let num_anchors = shape[2];
        let sx = orig_w as f32 / self.input_size as f32;
        let sy = orig_h as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for a in 0..num_anchors {
            let mut best_class = 0usize;
            let mut best_score = 0.0f32;
            for c in 0..num_classes {
                let score = view[[0, 4 + c, a]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, a]];
            let cy = view[[0, 1, a]];
            let w = view[[0, 2, a]];
            let h = view[[0, 3, a]];
            let bbox = BoundingBox::new(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            );
            detections.push(Detection::new(
                bbox,
                best_score,
                &self.class_name(best_class),
                self.source,
            ));
        }
        Ok(non_max_suppress(detections, self.iou_threshold))
    }
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppress(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.label == det.label && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

impl ObjectDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectError::InvalidImage("zero-sized image".into()));
        }
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::Inference(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".into()))?;
        self.decode(output, image.width(), image.height())
    }
}
