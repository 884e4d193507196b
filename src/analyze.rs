use serde::{Deserialize, Serialize};

use crate::detect::{DetectionSet, Detection, LABEL_HARDHAT, LABEL_NO_HARDHAT};
use crate::geometry::{overlaps_head, BoundingBox};

/// Helmet status of one detected person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonStatus {
    WearingHelmet,
    NoHelmet,
    Unknown,
}

/// Which analysis algorithm produced a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    SpecializedModel,
    ColorHeuristicFallback,
}

/// Per-person compliance verdict. Produced exactly once per detected person
/// per image; immutable after creation.
///
/// Wire shape: `bbox` serializes in origin+size form (`[x, y, w, h]`, whole
/// pixels) for compatibility with result consumers; internally the canonical
/// corner-pair `BoundingBox` is used.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonVerdict {
    #[serde(with = "xywh_wire")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub has_helmet: bool,
    pub helmet_confidence: f32,
    pub status: PersonStatus,
    #[serde(rename = "detection_method")]
    pub method: AnalysisMethod,
}

mod xywh_wire {
    use super::BoundingBox;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bbox: &BoundingBox, ser: S) -> Result<S::Ok, S::Error> {
        bbox.to_xywh().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<BoundingBox, D::Error> {
        let [x, y, w, h] = <[i32; 4]>::deserialize(de)?;
        Ok(BoundingBox::from_xywh(x as f32, y as f32, w as f32, h as f32))
    }
}

/// Turns a routed detection set into an ordered sequence of verdicts.
///
/// Pure function of its input: identical detections yield identical verdicts,
/// and output order follows upstream detection order (never sorted).
pub fn analyze(set: &DetectionSet) -> Vec<PersonVerdict> {
    match set {
        DetectionSet::DirectLabel(detections) => analyze_direct_label(detections),
        DetectionSet::PersonsAndHelmets { persons, helmets } => {
            analyze_geometric(persons, helmets)
        }
    }
}

/// Direct-label algorithm: the detector already fused person+helmet identity
/// into its class labels, so each Hardhat / NO-Hardhat detection maps 1:1 to
/// a verdict. Other PPE classes (vests, masks, machinery) are ignored.
fn analyze_direct_label(detections: &[Detection]) -> Vec<PersonVerdict> {
    detections
        .iter()
        .filter_map(|det| {
            let has_helmet = match det.label.as_str() {
                LABEL_HARDHAT => true,
                LABEL_NO_HARDHAT => false,
                _ => return None,
            };
            Some(PersonVerdict {
                bbox: det.bbox,
                confidence: det.confidence,
                has_helmet,
                helmet_confidence: if has_helmet { det.confidence } else { 0.0 },
                status: if has_helmet {
                    PersonStatus::WearingHelmet
                } else {
                    PersonStatus::NoHelmet
                },
                method: AnalysisMethod::SpecializedModel,
            })
        })
        .collect()
}

/// Geometric-matching algorithm for independently detected persons and
/// helmet candidates.
///
/// Two-stage policy, preserved exactly: a candidate is ADMITTED iff its
/// head-restricted IoU with the person clears the overlap threshold, but
/// admitted candidates are RANKED by whole-box `iou(person, helmet) *
/// helmet.confidence`. Ties keep the first-encountered candidate.
fn analyze_geometric(persons: &[Detection], helmets: &[Detection]) -> Vec<PersonVerdict> {
    persons
        .iter()
        .map(|person| {
            let mut best: Option<&Detection> = None;
            let mut best_score = 0.0f32;
            for helmet in helmets {
                if !overlaps_head(&person.bbox, &helmet.bbox) {
                    continue;
                }
                let score = person.bbox.iou(&helmet.bbox) * helmet.confidence;
                if score > best_score {
                    best_score = score;
                    best = Some(helmet);
                }
            }
            match best {
                Some(helmet) => PersonVerdict {
                    bbox: person.bbox,
                    confidence: person.confidence,
                    has_helmet: true,
                    helmet_confidence: helmet.confidence,
                    status: PersonStatus::WearingHelmet,
                    method: AnalysisMethod::ColorHeuristicFallback,
                },
                None => PersonVerdict {
                    bbox: person.bbox,
                    confidence: person.confidence,
                    has_helmet: false,
                    helmet_confidence: 0.0,
                    status: PersonStatus::NoHelmet,
                    method: AnalysisMethod::ColorHeuristicFallback,
                },
            }
        })
        .collect()
}
