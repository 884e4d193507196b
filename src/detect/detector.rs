use image::RgbImage;
use thiserror::Error;

use crate::geometry::BoundingBox;

/// Class label emitted by the specialized PPE model for a person wearing a helmet.
pub const LABEL_HARDHAT: &str = "Hardhat";
/// Class label emitted by the specialized PPE model for a bare-headed person.
pub const LABEL_NO_HARDHAT: &str = "NO-Hardhat";
/// Class label for a person from the generic detector.
pub const LABEL_PERSON: &str = "person";
/// Class label attached to color-heuristic helmet candidates.
pub const LABEL_HELMET_CANDIDATE: &str = "helmet";

/// Which strategy produced a detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// Specialized PPE model with fused person+helmet classes.
    Specialized,
    /// Generic person detector used by the fallback strategy.
    PersonModel,
    /// Color heuristic over a person's head region.
    ColorHeuristic,
}

/// A raw detection as returned by a detector capability.
///
/// Immutable once produced: downstream analysis reads, never rewrites.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
    pub source: StrategyKind,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, label: &str, source: StrategyKind) -> Self {
        Self {
            bbox,
            confidence,
            label: label.to_string(),
            source,
        }
    }
}

/// Hard failures of a detector capability.
///
/// An empty detection list is NOT an error; callers must distinguish
/// `Ok(vec![])` (valid image, nothing found) from `Err(_)` (the call itself
/// failed).
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

/// Black-box object detector capability.
///
/// Implementations own their model state; `detect` takes `&mut self` because
/// inference engines are not generally re-entrant.
pub trait ObjectDetector: Send {
    /// Detector identifier, for logs.
    fn name(&self) -> &'static str;

    /// Run detection over a whole image.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectError>;
}

/// Replaceable helmet-candidate finder used by the fallback strategy.
///
/// Contract: given the image and one person box, return zero or more candidate
/// helmet boxes with confidence. Implementations must not fail: an
/// inscrutable head region simply yields no candidates.
pub trait HelmetFinder: Send {
    fn name(&self) -> &'static str;

    fn find_candidates(&self, image: &RgbImage, person: &BoundingBox) -> Vec<Detection>;
}
