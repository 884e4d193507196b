//! helmwatchd - Queue-driven helmet-compliance analysis worker.
//!
//! Consumes processing requests from the broker one at a time, runs the
//! detection pipeline against images in object storage and publishes one
//! result per request.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use helmwatch::config::DetectionSettings;
use helmwatch::detect::backends::{ColorHeuristicFinder, StubDetector};
use helmwatch::{
    Annotator, FsObjectStore, HelmwatchConfig, HttpObjectStore, MqttQueue, ObjectDetector,
    ObjectStore, ProcessingWorker, StrategyRouter,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Helmet-compliance image analysis worker")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "HELMWATCH_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("HELMWATCH_CONFIG", path);
    }
    let cfg = HelmwatchConfig::load()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        flag.store(true, Ordering::SeqCst);
    })?;

    let store: Box<dyn ObjectStore> = match &cfg.storage.local_root {
        Some(root) => {
            log::info!("using local object store at {}", root.display());
            Box::new(FsObjectStore::new(root))
        }
        None => Box::new(HttpObjectStore::new(&cfg.storage.endpoint)?),
    };

    let annotator = match &cfg.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => {
            log::info!("no font configured, annotating boxes without labels");
            Annotator::new()
        }
    };

    let router = StrategyRouter::standard(
        build_specialized(&cfg.detection),
        build_person(&cfg.detection),
        Box::new(ColorHeuristicFinder::new()),
    );

    let queue = MqttQueue::connect(
        &cfg.queue.broker_addr,
        &cfg.queue.client_id,
        &cfg.queue.request_topic,
        cfg.queue.username.as_deref(),
        cfg.queue.password.as_deref(),
    )?;

    let mut worker = ProcessingWorker::new(
        queue,
        store,
        router,
        annotator,
        cfg.queue.results_topic.clone(),
        shutdown,
    );
    worker.run()
}

#[cfg(feature = "backend-tract")]
fn build_specialized(cfg: &DetectionSettings) -> Box<dyn ObjectDetector> {
    if let Some(path) = &cfg.specialized_model_path {
        match helmwatch::TractDetector::specialized(
            path,
            cfg.model_input_size,
            cfg.confidence_threshold,
            cfg.iou_threshold,
        ) {
            Ok(detector) => return Box::new(detector),
            Err(e) => log::warn!("failed to load specialized model: {:#}", e),
        }
    }
    log::warn!("no specialized model, using stub detector");
    Box::new(StubDetector::empty())
}

#[cfg(not(feature = "backend-tract"))]
fn build_specialized(cfg: &DetectionSettings) -> Box<dyn ObjectDetector> {
    if cfg.specialized_model_path.is_some() {
        log::warn!("model path configured but built without the backend-tract feature");
    }
    Box::new(StubDetector::empty())
}

#[cfg(feature = "backend-tract")]
fn build_person(cfg: &DetectionSettings) -> Box<dyn ObjectDetector> {
    if let Some(path) = &cfg.person_model_path {
        match helmwatch::TractDetector::person(
            path,
            cfg.model_input_size,
            cfg.confidence_threshold,
            cfg.iou_threshold,
        ) {
            Ok(detector) => return Box::new(detector),
            Err(e) => log::warn!("failed to load person model: {:#}", e),
        }
    }
    log::warn!("no person model, fallback strategy will find nobody");
    Box::new(StubDetector::empty())
}

#[cfg(not(feature = "backend-tract"))]
fn build_person(_cfg: &DetectionSettings) -> Box<dyn ObjectDetector> {
    Box::new(StubDetector::empty())
}
