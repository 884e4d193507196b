use image::RgbImage;

use crate::detect::detector::{
    DetectError, Detection, HelmetFinder, ObjectDetector, LABEL_HARDHAT, LABEL_NO_HARDHAT,
    LABEL_PERSON,
};

/// Detections routed to the appropriate analysis algorithm.
#[derive(Clone, Debug)]
pub enum DetectionSet {
    /// The detector already fused person+helmet identity into class labels;
    /// each detection maps 1:1 to a verdict.
    DirectLabel(Vec<Detection>),
    /// Persons and helmet candidates were detected independently and must be
    /// reconciled geometrically.
    PersonsAndHelmets {
        persons: Vec<Detection>,
        helmets: Vec<Detection>,
    },
}

impl DetectionSet {
    pub fn is_empty(&self) -> bool {
        match self {
            DetectionSet::DirectLabel(d) => d.is_empty(),
            DetectionSet::PersonsAndHelmets { persons, .. } => persons.is_empty(),
        }
    }
}

/// The three signals a strategy can produce for one image.
#[derive(Debug)]
pub enum StrategyOutcome {
    Success(DetectionSet),
    Empty,
    HardFailure(DetectError),
}

/// One named detection strategy. Strategies are tried in priority order by
/// the router; the first `Success` is terminal.
pub trait DetectionStrategy: Send {
    fn name(&self) -> &'static str;

    fn run(&mut self, image: &RgbImage) -> StrategyOutcome;
}

/// Preferred strategy: one pass of the specialized PPE model.
///
/// Emptiness is judged on usable detections. The model also reports vests,
/// masks, machinery and vehicles; an output with none of the helmet classes
/// is `Empty` so the fallback still gets its chance at the image.
pub struct SpecializedModelStrategy {
    detector: Box<dyn ObjectDetector>,
}

impl SpecializedModelStrategy {
    pub fn new(detector: Box<dyn ObjectDetector>) -> Self {
        Self { detector }
    }
}

impl DetectionStrategy for SpecializedModelStrategy {
    fn name(&self) -> &'static str {
        "specialized_model"
    }

    fn run(&mut self, image: &RgbImage) -> StrategyOutcome {
        match self.detector.detect(image) {
            Ok(detections) => {
                let usable: Vec<Detection> = detections
                    .into_iter()
                    .filter(|d| d.label == LABEL_HARDHAT || d.label == LABEL_NO_HARDHAT)
                    .collect();
                if usable.is_empty() {
                    StrategyOutcome::Empty
                } else {
                    StrategyOutcome::Success(DetectionSet::DirectLabel(usable))
                }
            }
            Err(e) => StrategyOutcome::HardFailure(e),
        }
    }
}

/// Fallback strategy: generic person detection plus a color heuristic over
/// each person's head region.
pub struct HeuristicFallbackStrategy {
    person_detector: Box<dyn ObjectDetector>,
    helmet_finder: Box<dyn HelmetFinder>,
}

impl HeuristicFallbackStrategy {
    pub fn new(
        person_detector: Box<dyn ObjectDetector>,
        helmet_finder: Box<dyn HelmetFinder>,
    ) -> Self {
        Self {
            person_detector,
            helmet_finder,
        }
    }
}

impl DetectionStrategy for HeuristicFallbackStrategy {
    fn name(&self) -> &'static str {
        "color_heuristic_fallback"
    }

    fn run(&mut self, image: &RgbImage) -> StrategyOutcome {
        let persons: Vec<Detection> = match self.person_detector.detect(image) {
            Ok(detections) => detections
                .into_iter()
                .filter(|d| d.label == LABEL_PERSON)
                .collect(),
            Err(e) => return StrategyOutcome::HardFailure(e),
        };
        if persons.is_empty() {
            return StrategyOutcome::Empty;
        }

        let mut helmets = Vec::new();
        for person in &persons {
            helmets.extend(self.helmet_finder.find_candidates(image, &person.bbox));
        }
        log::debug!(
            "heuristic fallback: {} persons, {} helmet candidates",
            persons.len(),
            helmets.len()
        );
        StrategyOutcome::Success(DetectionSet::PersonsAndHelmets { persons, helmets })
    }
}

/// Tries strategies in priority order, one attempt each per image.
///
/// Failure of a non-final strategy degrades gracefully: it is logged and the
/// next strategy runs, never surfacing to the caller. Only the final
/// strategy's hard failure is a hard error. An all-empty run is a valid
/// zero-people outcome, reported through the last strategy that ran.
pub struct StrategyRouter {
    strategies: Vec<Box<dyn DetectionStrategy>>,
}

impl StrategyRouter {
    pub fn new(strategies: Vec<Box<dyn DetectionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Standard priority order: specialized model first, heuristic fallback second.
    pub fn standard(
        specialized: Box<dyn ObjectDetector>,
        person_detector: Box<dyn ObjectDetector>,
        helmet_finder: Box<dyn HelmetFinder>,
    ) -> Self {
        Self::new(vec![
            Box::new(SpecializedModelStrategy::new(specialized)),
            Box::new(HeuristicFallbackStrategy::new(
                person_detector,
                helmet_finder,
            )),
        ])
    }

    pub fn detect(&mut self, image: &RgbImage) -> Result<DetectionSet, DetectError> {
        let last = self.strategies.len().saturating_sub(1);
        for (i, strategy) in self.strategies.iter_mut().enumerate() {
            match strategy.run(image) {
                StrategyOutcome::Success(set) => {
                    log::info!("strategy {} produced detections", strategy.name());
                    return Ok(set);
                }
                StrategyOutcome::Empty => {
                    log::info!("strategy {} found nothing", strategy.name());
                }
                StrategyOutcome::HardFailure(e) if i < last => {
                    log::warn!("strategy {} failed, falling back: {}", strategy.name(), e);
                }
                StrategyOutcome::HardFailure(e) => return Err(e),
            }
        }
        // Every strategy came up empty: zero people is a valid outcome.
        Ok(DetectionSet::PersonsAndHelmets {
            persons: Vec::new(),
            helmets: Vec::new(),
        })
    }
}
