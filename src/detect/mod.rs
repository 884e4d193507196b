mod detector;
mod strategy;

pub mod backends;

pub use detector::{
    DetectError, Detection, HelmetFinder, ObjectDetector, StrategyKind, LABEL_HARDHAT,
    LABEL_HELMET_CANDIDATE, LABEL_NO_HARDHAT, LABEL_PERSON,
};
pub use strategy::{
    DetectionSet, DetectionStrategy, HeuristicFallbackStrategy, SpecializedModelStrategy,
    StrategyOutcome, StrategyRouter,
};
