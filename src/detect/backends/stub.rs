use image::RgbImage;

use crate::detect::detector::{DetectError, Detection, ObjectDetector};

/// Stub detector for development and tests: returns a canned detection list
/// on every call.
pub struct StubDetector {
    detections: Vec<Detection>,
}

impl StubDetector {
    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// A detector that never finds anything.
    pub fn empty() -> Self {
        Self {
            detections: Vec::new(),
        }
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        Ok(self.detections.clone())
    }
}
