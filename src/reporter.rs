//! Capture entry point.
//!
//! Capture sources hold a [`Reporter`] and hand it raw errors. Reporting
//! never blocks: normalization happens inline and the submission runs as a
//! background task. Every submission is tracked so the host can wait for the
//! in-flight ones before shutting down.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::coordinator::{SubmitOutcome, UploadCoordinator};
use crate::normalizer::{normalize, RawError};
use crate::record::ErrorRecord;

/// Cheap, clonable handle capture sources report through.
#[derive(Clone)]
pub struct Reporter {
    coordinator: Arc<UploadCoordinator>,
    tracker: TaskTracker,
}

impl Reporter {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self {
            coordinator,
            tracker: TaskTracker::new(),
        }
    }

    /// Report a raw error, letting the capture decide whether it must stay
    /// local (see [`RawError::prefers_local`]).
    ///
    /// Must be called from within a tokio runtime.
    pub fn report(&self, raw: RawError) -> JoinHandle<SubmitOutcome> {
        let force_local = raw.prefers_local();
        self.spawn(raw, force_local)
    }

    /// Report a raw error that must only be written to the local store.
    pub fn report_local(&self, raw: RawError) -> JoinHandle<SubmitOutcome> {
        self.spawn(raw, true)
    }

    /// Report an already-normalized record.
    pub fn report_record(&self, record: ErrorRecord, force_local: bool) -> JoinHandle<SubmitOutcome> {
        let coordinator = self.coordinator.clone();
        self.tracker
            .spawn(async move { coordinator.submit(record, force_local).await })
    }

    /// Number of submissions still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every submission spawned so far has been delivered,
    /// persisted or dropped.
    ///
    /// Reports made after this returns are still accepted and tracked.
    pub async fn wait_idle(&self) {
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight submissions");
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn spawn(&self, raw: RawError, force_local: bool) -> JoinHandle<SubmitOutcome> {
        let source = raw.source();
        let record = normalize(raw);
        debug!(%source, force_local, "Error captured");
        self.report_record(record, force_local)
    }

    pub fn coordinator(&self) -> &Arc<UploadCoordinator> {
        &self.coordinator
    }
}
