mod heuristic;
mod stub;
mod tract;

pub use heuristic::ColorHeuristicFinder;
pub use stub::StubDetector;
#[cfg(feature = "backend-tract")]
pub use tract::{TractDetector, COCO_PERSON_CLASS_ID, PPE_CLASS_NAMES};
