//! Helmwatch
//!
//! Queue-driven helmet-compliance analysis for construction-site imagery.
//!
//! # Pipeline
//!
//! One request at a time: receive → fetch image → detect → analyze →
//! annotate → upload → publish result → ack. The invariants the worker
//! enforces:
//!
//! 1. **One result per request**: every received request yields exactly one
//!    published result, success or failure shaped identically.
//! 2. **Publish before ack**: a request is settled only after its result is
//!    on the wire, so crashes redeliver instead of losing work.
//! 3. **Graceful degradation**: detection strategies are tried in priority
//!    order; a failing specialized model falls back, it never errors out.
//! 4. **No temp residue**: per-request scratch files are removed on every
//!    exit path.
//!
//! # Module Structure
//!
//! - `geometry`: bounding-box arithmetic (IoU, head regions)
//! - `detect`: detector traits, strategy routing, backends
//! - `analyze`: per-person compliance verdicts
//! - `worker`: the message-driven control loop
//! - `queue` / `storage`: broker and object-store transports

pub mod analyze;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod geometry;
pub mod messages;
pub mod queue;
pub mod storage;
pub mod worker;

pub use analyze::{analyze, AnalysisMethod, PersonStatus, PersonVerdict};
pub use annotate::Annotator;
pub use config::HelmwatchConfig;
pub use detect::backends::{ColorHeuristicFinder, StubDetector};
#[cfg(feature = "backend-tract")]
pub use detect::backends::TractDetector;
pub use detect::{
    DetectError, Detection, DetectionSet, DetectionStrategy, HelmetFinder, ObjectDetector,
    StrategyKind, StrategyOutcome, StrategyRouter,
};
pub use geometry::BoundingBox;
pub use messages::{
    annotated_filename, parse_request, ProcessingRequest, ProcessingResult, ProcessingStatus,
    ResultEnvelope,
};
pub use queue::{Delivery, InMemoryQueue, MqttQueue, QueueTransport};
pub use storage::{FsObjectStore, HttpObjectStore, ObjectStore};
pub use worker::ProcessingWorker;
