//! End-to-end pipeline tests over the in-memory queue and a filesystem
//! object store, with stub and heuristic detectors.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;

use helmwatch::detect::backends::{ColorHeuristicFinder, StubDetector};
use helmwatch::detect::{Detection, StrategyKind, LABEL_HARDHAT, LABEL_NO_HARDHAT, LABEL_PERSON};
use helmwatch::{
    Annotator, BoundingBox, FsObjectStore, InMemoryQueue, ObjectStore, ProcessingWorker,
    QueueTransport, StrategyRouter,
};

const RESULTS: &str = "results";

fn worker(
    store: Box<dyn ObjectStore>,
    specialized: Vec<Detection>,
    persons: Vec<Detection>,
) -> ProcessingWorker<InMemoryQueue> {
    let router = StrategyRouter::standard(
        Box::new(StubDetector::with_detections(specialized)),
        Box::new(StubDetector::with_detections(persons)),
        Box::new(ColorHeuristicFinder::new()),
    );
    ProcessingWorker::new(
        InMemoryQueue::new(),
        store,
        router,
        Annotator::new(),
        RESULTS,
        Arc::new(AtomicBool::new(false)),
    )
}

fn ppe(label: &str, conf: f32, x1: f32) -> Detection {
    Detection::new(
        BoundingBox::new(x1, 10.0, x1 + 40.0, 100.0),
        conf,
        label,
        StrategyKind::Specialized,
    )
}

fn handle_one(worker: &mut ProcessingWorker<InMemoryQueue>, payload: &[u8]) {
    worker.transport_mut().enqueue(payload.to_vec());
    let delivery = worker
        .transport_mut()
        .receive(Duration::ZERO)
        .unwrap()
        .unwrap();
    worker.handle_delivery(delivery).unwrap();
}

fn first_result(worker: &mut ProcessingWorker<InMemoryQueue>) -> Value {
    let payload = worker.transport_mut().published(RESULTS)[0].clone();
    let envelope: Value = serde_json::from_slice(&payload).unwrap();
    envelope["data"].clone()
}

#[test]
fn specialized_model_request_end_to_end() {
    let root = TempDir::new().unwrap();
    RgbImage::from_pixel(200, 150, Rgb([100, 100, 100]))
        .save(root.path().join("site1.jpg"))
        .unwrap();

    let mut worker = worker(
        Box::new(FsObjectStore::new(root.path())),
        vec![ppe(LABEL_HARDHAT, 0.9, 10.0), ppe(LABEL_NO_HARDHAT, 0.7, 80.0)],
        Vec::new(),
    );
    handle_one(
        &mut worker,
        br#"{"image_id": "42", "image_filename": "site1.jpg", "timestamp": "2024-05-01T10:00:00Z"}"#,
    );

    let data = first_result(&mut worker);
    assert_eq!(data["image_id"], "42");
    assert_eq!(data["image_filename"], "site1.jpg");
    assert_eq!(data["timestamp"], "2024-05-01T10:00:00Z");
    assert_eq!(data["processing_status"], "completed");
    assert_eq!(data["total_people"], 2);
    assert_eq!(data["people_with_helmets"], 1);
    assert!((data["compliance_rate"].as_f64().unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(data["annotated_filename"], "site1_annotated.jpg");
    assert_eq!(data["error"], Value::Null);

    let detections = data["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0]["status"], "wearing_helmet");
    assert_eq!(detections[0]["detection_method"], "specialized_model");
    assert_eq!(detections[0]["bbox"], serde_json::json!([10, 10, 40, 90]));
    assert_eq!(detections[1]["status"], "no_helmet");
    assert_eq!(detections[1]["helmet_confidence"], 0.0);

    // Annotated copy landed next to the original.
    assert!(root.path().join("site1_annotated.jpg").exists());
}

#[test]
fn empty_specialized_result_falls_back_to_heuristic() {
    let root = TempDir::new().unwrap();
    // Worker in a yellow helmet: bright patch at the top of the person box.
    let mut img = RgbImage::from_pixel(200, 400, Rgb([70, 70, 70]));
    for y in 10..50 {
        for x in 60..140 {
            img.put_pixel(x, y, Rgb([235, 205, 40]));
        }
    }
    img.save(root.path().join("yard.png")).unwrap();

    let person = Detection::new(
        BoundingBox::new(50.0, 0.0, 150.0, 380.0),
        0.85,
        LABEL_PERSON,
        StrategyKind::PersonModel,
    );
    let mut worker = worker(
        Box::new(FsObjectStore::new(root.path())),
        Vec::new(),
        vec![person],
    );
    handle_one(&mut worker, br#"{"image_filename": "yard.png"}"#);

    let data = first_result(&mut worker);
    assert_eq!(data["processing_status"], "completed");
    assert_eq!(data["total_people"], 1);
    assert_eq!(data["people_with_helmets"], 1);
    let detections = data["detections"].as_array().unwrap();
    assert_eq!(detections[0]["detection_method"], "color_heuristic_fallback");
    assert_eq!(detections[0]["status"], "wearing_helmet");
}

#[test]
fn bareheaded_person_on_fallback_path_is_a_violation() {
    let root = TempDir::new().unwrap();
    RgbImage::from_pixel(200, 400, Rgb([70, 70, 70]))
        .save(root.path().join("yard.png"))
        .unwrap();

    let person = Detection::new(
        BoundingBox::new(50.0, 0.0, 150.0, 380.0),
        0.85,
        LABEL_PERSON,
        StrategyKind::PersonModel,
    );
    let mut worker = worker(
        Box::new(FsObjectStore::new(root.path())),
        Vec::new(),
        vec![person],
    );
    handle_one(&mut worker, br#"{"image_filename": "yard.png"}"#);

    let data = first_result(&mut worker);
    assert_eq!(data["total_people"], 1);
    assert_eq!(data["people_with_helmets"], 0);
    assert_eq!(data["compliance_rate"], 0.0);
    assert_eq!(data["detections"][0]["status"], "no_helmet");
}

#[test]
fn enveloped_request_is_unwrapped() {
    let root = TempDir::new().unwrap();
    RgbImage::from_pixel(100, 100, Rgb([100, 100, 100]))
        .save(root.path().join("a.png"))
        .unwrap();

    let mut worker = worker(
        Box::new(FsObjectStore::new(root.path())),
        vec![ppe(LABEL_HARDHAT, 0.8, 10.0)],
        Vec::new(),
    );
    handle_one(
        &mut worker,
        br#"{"data": {"image_id": 7, "image_filename": "a.png"}}"#,
    );

    let data = first_result(&mut worker);
    assert_eq!(data["image_id"], 7);
    assert_eq!(data["processing_status"], "completed");
}

struct UploadlessStore {
    inner: FsObjectStore,
}

impl ObjectStore for UploadlessStore {
    fn fetch(&self, key: &str, dir: &Path) -> anyhow::Result<PathBuf> {
        self.inner.fetch(key, dir)
    }

    fn store(&self, _local: &Path, _key: &str) -> bool {
        false
    }
}

#[test]
fn failed_upload_nulls_annotated_filename_but_completes() {
    let root = TempDir::new().unwrap();
    RgbImage::from_pixel(100, 100, Rgb([100, 100, 100]))
        .save(root.path().join("a.png"))
        .unwrap();

    let store = UploadlessStore {
        inner: FsObjectStore::new(root.path()),
    };
    let mut worker = worker(Box::new(store), vec![ppe(LABEL_HARDHAT, 0.8, 10.0)], Vec::new());
    handle_one(&mut worker, br#"{"image_filename": "a.png"}"#);

    let data = first_result(&mut worker);
    assert_eq!(data["processing_status"], "completed");
    assert_eq!(data["annotated_filename"], Value::Null);
    assert_eq!(data["total_people"], 1);
}

#[test]
fn undecodable_image_fails_the_request_not_the_worker() {
    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();

    let mut worker = worker(
        Box::new(FsObjectStore::new(root.path())),
        Vec::new(),
        Vec::new(),
    );
    handle_one(&mut worker, br#"{"image_filename": "broken.jpg"}"#);

    let data = first_result(&mut worker);
    assert_eq!(data["processing_status"], "failed");
    assert!(data["error"].as_str().unwrap().contains("broken.jpg"));
    assert_eq!(data["detections"].as_array().unwrap().len(), 0);
}
