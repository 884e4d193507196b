use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::analyze::analyze;
use crate::annotate::Annotator;
use crate::detect::StrategyRouter;
use crate::messages::{
    annotated_filename, parse_request, ProcessingRequest, ProcessingResult, ResultEnvelope,
};
use crate::queue::{Delivery, QueueTransport};
use crate::storage::ObjectStore;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The queue-driven control loop: one request at a time, fetched from
/// storage, routed through detection, analyzed, annotated and answered.
///
/// Failure containment is two-layered. Anything going wrong inside the image
/// pipeline yields a `failed` result published like any other; only failures
/// of the messaging layer itself (unparseable payload, broken publish) leave
/// the delivery unsettled for redelivery. Every received request produces
/// exactly one published result.
pub struct ProcessingWorker<Q: QueueTransport> {
    queue: Q,
    store: Box<dyn ObjectStore>,
    router: StrategyRouter,
    annotator: Annotator,
    results_topic: String,
    shutdown: Arc<AtomicBool>,
}

impl<Q: QueueTransport> ProcessingWorker<Q> {
    pub fn new(
        queue: Q,
        store: Box<dyn ObjectStore>,
        router: StrategyRouter,
        annotator: Annotator,
        results_topic: impl Into<String>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            store,
            router,
            annotator,
            results_topic: results_topic.into(),
            shutdown,
        }
    }

    /// Consumes requests until the shutdown flag is raised. Returns an error
    /// only when the queue connection is unusable.
    pub fn run(&mut self) -> Result<()> {
        log::info!("worker started, publishing results to {}", self.results_topic);
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.queue.receive(POLL_INTERVAL)? {
                Some(delivery) => self.handle_delivery(delivery)?,
                None => continue,
            }
        }
        log::info!("worker stopped");
        Ok(())
    }

    /// Handles one delivery through to settlement. Publish-then-ack: the
    /// result must be on the wire before the request is considered done, so
    /// a crash in between redelivers the request rather than losing it.
    pub fn handle_delivery(&mut self, delivery: Delivery<Q::Token>) -> Result<()> {
        let request = match parse_request(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                log::error!("unparseable request payload: {:#}", e);
                return self.queue.nack(delivery.token, true);
            }
        };
        log::info!(
            "processing request for {}",
            request.image_filename.as_deref().unwrap_or("<unnamed>")
        );

        let result = self.process(&request);
        let payload = match ResultEnvelope::new(result).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("could not serialize result: {:#}", e);
                return self.queue.nack(delivery.token, true);
            }
        };
        if let Err(e) = self.queue.publish(&self.results_topic, &payload) {
            log::error!("result publish failed, leaving request for redelivery: {:#}", e);
            return self.queue.nack(delivery.token, true);
        }
        self.queue.ack(delivery.token)
    }

    /// Runs the image pipeline for one request. Never returns an error: any
    /// failure collapses into a `failed` result with the cause recorded.
    fn process(&mut self, request: &ProcessingRequest) -> ProcessingResult {
        match self.try_process(request) {
            Ok(result) => result,
            Err(e) => {
                log::warn!(
                    "processing failed for {}: {:#}",
                    request.image_filename.as_deref().unwrap_or("<unnamed>"),
                    e
                );
                ProcessingResult::failed(request, format!("{:#}", e))
            }
        }
    }

    fn try_process(&mut self, request: &ProcessingRequest) -> Result<ProcessingResult> {
        let image_filename = request
            .image_filename
            .as_deref()
            .ok_or_else(|| anyhow!("request is missing image_filename"))?;

        // Temp files live for exactly one request; the directory is removed
        // on every exit path when this guard drops.
        let workspace = TempDir::new().context("failed to create temp workspace")?;

        let local = self.store.fetch(image_filename, workspace.path())?;
        let image = image::open(&local)
            .with_context(|| format!("failed to decode image {}", local.display()))?
            .to_rgb8();

        let detections = self.router.detect(&image)?;
        let verdicts = analyze(&detections);
        log::info!(
            "{}: {} people, {} with helmets",
            image_filename,
            verdicts.len(),
            verdicts.iter().filter(|v| v.has_helmet).count()
        );

        let annotated_key = annotated_filename(image_filename);
        let annotated_local = workspace.path().join(&annotated_key);
        self.annotator.render(&image, &verdicts, &annotated_local)?;

        let annotated = if self.store.store(&annotated_local, &annotated_key) {
            Some(annotated_key)
        } else {
            log::warn!("annotated image upload failed for {}", image_filename);
            None
        };

        Ok(ProcessingResult::completed(request, annotated, verdicts))
    }

    pub fn transport_mut(&mut self) -> &mut Q {
        &mut self.queue
    }
}
