use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analyze::PersonVerdict;

/// Inbound analysis request.
///
/// `image_id` and `timestamp` are carried as raw JSON values: producers send
/// integers, UUID strings or nothing at all, and results must echo whatever
/// came in without reinterpretation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingRequest {
    #[serde(default)]
    pub image_id: Value,
    pub image_filename: Option<String>,
    #[serde(default)]
    pub timestamp: Value,
}

/// Parses a request payload, unwrapping an optional `{"data": ...}` envelope.
///
/// Some producers wrap the request body in an envelope and some publish it
/// bare; both forms are accepted. Payloads that parse as JSON but not as a
/// request object are an error for the caller to decide on.
pub fn parse_request(payload: &[u8]) -> Result<ProcessingRequest> {
    let value: Value =
        serde_json::from_slice(payload).context("request payload is not valid JSON")?;
    let body = match value {
        Value::Object(ref map) if map.contains_key("data") => map["data"].clone(),
        other => other,
    };
    serde_json::from_value(body).context("request body does not match the expected schema")
}

/// Terminal status of one processed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

/// Outbound per-image analysis result.
///
/// Constructed only through [`ProcessingResult::completed`] and
/// [`ProcessingResult::failed`], which derive the aggregate counters from the
/// verdict list so the two can never disagree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub image_id: Value,
    pub image_filename: Option<String>,
    pub annotated_filename: Option<String>,
    pub processing_status: ProcessingStatus,
    pub total_people: usize,
    pub people_with_helmets: usize,
    pub compliance_rate: f64,
    pub detections: Vec<PersonVerdict>,
    pub error: Option<String>,
    pub timestamp: Value,
}

impl ProcessingResult {
    pub fn completed(
        request: &ProcessingRequest,
        annotated_filename: Option<String>,
        detections: Vec<PersonVerdict>,
    ) -> Self {
        let total_people = detections.len();
        let people_with_helmets = detections.iter().filter(|v| v.has_helmet).count();
        let compliance_rate = if total_people > 0 {
            people_with_helmets as f64 / total_people as f64
        } else {
            0.0
        };
        Self {
            image_id: request.image_id.clone(),
            image_filename: request.image_filename.clone(),
            annotated_filename,
            processing_status: ProcessingStatus::Completed,
            total_people,
            people_with_helmets,
            compliance_rate,
            detections,
            error: None,
            timestamp: request.timestamp.clone(),
        }
    }

    pub fn failed(request: &ProcessingRequest, error: impl Into<String>) -> Self {
        Self {
            image_id: request.image_id.clone(),
            image_filename: request.image_filename.clone(),
            annotated_filename: None,
            processing_status: ProcessingStatus::Failed,
            total_people: 0,
            people_with_helmets: 0,
            compliance_rate: 0.0,
            detections: Vec::new(),
            error: Some(error.into()),
            timestamp: request.timestamp.clone(),
        }
    }
}

/// Results are always published wrapped in a `{"data": ...}` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub data: ProcessingResult,
}

impl ResultEnvelope {
    pub fn new(data: ProcessingResult) -> Self {
        Self { data }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize result envelope")
    }
}

/// Derives the annotated object key from the source key: `site.jpg` becomes
/// `site_annotated.jpg`; extensionless names get a bare `_annotated` suffix.
pub fn annotated_filename(image_filename: &str) -> String {
    match image_filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_annotated.{}", stem, ext),
        _ => format!("{}_annotated", image_filename),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AnalysisMethod, PersonStatus};
    use crate::geometry::BoundingBox;
    use serde_json::json;

    fn verdict(has_helmet: bool) -> PersonVerdict {
        PersonVerdict {
            bbox: BoundingBox::new(0.0, 0.0, 50.0, 100.0),
            confidence: 0.9,
            has_helmet,
            helmet_confidence: if has_helmet { 0.8 } else { 0.0 },
            status: if has_helmet {
                PersonStatus::WearingHelmet
            } else {
                PersonStatus::NoHelmet
            },
            method: AnalysisMethod::SpecializedModel,
        }
    }

    fn request() -> ProcessingRequest {
        ProcessingRequest {
            image_id: json!(42),
            image_filename: Some("site.jpg".into()),
            timestamp: json!("2024-05-01T10:00:00Z"),
        }
    }

    #[test]
    fn parse_accepts_bare_request() {
        let req = parse_request(br#"{"image_id": 7, "image_filename": "a.png"}"#).unwrap();
        assert_eq!(req.image_id, json!(7));
        assert_eq!(req.image_filename.as_deref(), Some("a.png"));
        assert_eq!(req.timestamp, Value::Null);
    }

    #[test]
    fn parse_unwraps_data_envelope() {
        let req =
            parse_request(br#"{"data": {"image_id": "u-1", "image_filename": "b.jpg"}}"#).unwrap();
        assert_eq!(req.image_id, json!("u-1"));
        assert_eq!(req.image_filename.as_deref(), Some("b.jpg"));
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(parse_request(b"not json").is_err());
    }

    #[test]
    fn parse_rejects_non_object_body() {
        assert!(parse_request(b"[1, 2, 3]").is_err());
    }

    #[test]
    fn completed_derives_counters_from_verdicts() {
        let result = ProcessingResult::completed(
            &request(),
            Some("site_annotated.jpg".into()),
            vec![verdict(true), verdict(false)],
        );
        assert_eq!(result.total_people, 2);
        assert_eq!(result.people_with_helmets, 1);
        assert!((result.compliance_rate - 0.5).abs() < 1e-9);
        assert_eq!(result.processing_status, ProcessingStatus::Completed);
        assert!(result.error.is_none());
        assert_eq!(result.image_id, json!(42));
        assert_eq!(result.timestamp, json!("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn completed_with_zero_people_has_zero_rate() {
        let result = ProcessingResult::completed(&request(), None, Vec::new());
        assert_eq!(result.total_people, 0);
        assert_eq!(result.compliance_rate, 0.0);
        assert_eq!(result.processing_status, ProcessingStatus::Completed);
    }

    #[test]
    fn failed_result_carries_error_and_no_detections() {
        let result = ProcessingResult::failed(&request(), "download failed");
        assert_eq!(result.processing_status, ProcessingStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("download failed"));
        assert!(result.detections.is_empty());
        assert!(result.annotated_filename.is_none());
    }

    #[test]
    fn envelope_wraps_result_under_data_key() {
        let envelope = ResultEnvelope::new(ProcessingResult::failed(&request(), "boom"));
        let value: Value = serde_json::from_slice(&envelope.to_payload().unwrap()).unwrap();
        assert_eq!(value["data"]["processing_status"], "failed");
        assert_eq!(value["data"]["error"], "boom");
    }

    #[test]
    fn annotated_filename_inserts_suffix_before_extension() {
        assert_eq!(annotated_filename("site.jpg"), "site_annotated.jpg");
        assert_eq!(annotated_filename("a.b.png"), "a.b_annotated.png");
        assert_eq!(annotated_filename("noext"), "noext_annotated");
        assert_eq!(annotated_filename(".hidden"), ".hidden_annotated");
    }
}
