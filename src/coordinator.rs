//! Upload coordination: per-record routing and batched draining.
//!
//! Immediate upload is an optimization reserved for the common case of a
//! logged-in user on an unmetered network. Every degraded case goes to the
//! local store, and the store is drained in bounded batches whenever a
//! trigger fires.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::device::{ConnectivityClass, DeviceContext, DEFAULT_READY_TIMEOUT};
use crate::error::{AuthError, DrainError, StoreError, UploadError};
use crate::record::{now_local, ErrorRecord, ServerRecord};
use crate::session::SessionContext;
use crate::sink::RemoteSink;
use crate::store::LogStore;

/// Default number of records per drain batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Result of submitting one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Sent straight to the collector; nothing persisted
    Delivered,

    /// Written to the local store
    Persisted {
        id: i64,
        /// True when an immediate upload was attempted and failed
        fallback: bool,
    },

    /// Lost: the store was unavailable
    Dropped,
}

/// Why a drain invocation ended.
#[derive(Debug)]
pub enum DrainStop {
    /// Store is empty
    Drained,

    /// Connectivity is not unmetered; nothing more is sent this time
    NotUnmetered,

    /// Another drain is in flight
    Busy,

    /// Device never became ready or the store could not be opened
    NotReady,

    /// A batch failed; its records stay persisted for the next trigger
    Failed(DrainError),
}

/// Summary of one drain invocation.
#[derive(Debug)]
pub struct DrainReport {
    /// Batches uploaded and deleted
    pub batches: usize,

    /// Records uploaded across all batches
    pub records_uploaded: usize,

    pub stop: DrainStop,
}

impl DrainReport {
    fn new(stop: DrainStop) -> Self {
        Self {
            batches: 0,
            records_uploaded: 0,
            stop,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stop, DrainStop::Drained)
    }
}

/// Statistics about pipeline operations.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Records handed to `submit`
    pub submitted: u64,

    /// Records delivered immediately
    pub delivered: u64,

    /// Records written to the store by the submission path
    pub persisted: u64,

    /// Persisted records whose immediate upload failed first
    pub fallbacks: u64,

    /// Records lost because the store was unavailable
    pub dropped: u64,

    /// Drain batches uploaded and deleted
    pub batches_uploaded: u64,

    /// Records removed from the store by draining
    pub records_drained: u64,

    /// Drain invocations halted by a failure
    pub drain_failures: u64,
}

/// Routes captured records and drains the local store.
///
/// Owns the store exclusively. Submissions may run concurrently; drains are
/// serialized, and a drain requested while one is running is skipped.
pub struct UploadCoordinator {
    store: LogStore,
    device: Arc<dyn DeviceContext>,
    session: Arc<dyn SessionContext>,
    sink: Arc<dyn RemoteSink>,
    ready_timeout: Duration,
    drain_lock: Mutex<()>,
    stats: RwLock<PipelineStats>,
}

impl UploadCoordinator {
    pub fn new(
        store: LogStore,
        device: Arc<dyn DeviceContext>,
        session: Arc<dyn SessionContext>,
        sink: Arc<dyn RemoteSink>,
    ) -> Self {
        Self {
            store,
            device,
            session,
            sink,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            drain_lock: Mutex::new(()),
            stats: RwLock::new(PipelineStats::default()),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Get current pipeline statistics.
    pub fn stats(&self) -> PipelineStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn update_stats(&self, update: impl FnOnce(&mut PipelineStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    /// Wait for the device and open the store.
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        if !self.device.ready(self.ready_timeout).await {
            return Err(StoreError::NotReady);
        }
        self.store.ensure_ready().await
    }

    /// Route one record to the collector or the local store.
    ///
    /// Never fails from the caller's point of view: upload problems fall back
    /// to the store, and store problems are logged and the record dropped.
    pub async fn submit(&self, mut record: ErrorRecord, force_local: bool) -> SubmitOutcome {
        self.update_stats(|s| s.submitted += 1);

        if let Err(e) = self.ensure_ready().await {
            error!(error = %e, message = %record.message, "Dropping error record");
            self.update_stats(|s| s.dropped += 1);
            return SubmitOutcome::Dropped;
        }

        let session = self.session.current();
        record.tenant_code = session.tenant_code.clone();
        record.user_code = session.user_code.clone();
        if record.occurred_at.is_none() {
            record.occurred_at = Some(now_local());
        }

        let connectivity = self.device.connectivity();
        let token = session.token();

        let token = match token {
            Some(token) if !force_local && connectivity == ConnectivityClass::Unmetered => token,
            _ => {
                debug!(
                    force_local,
                    authenticated = session.is_authenticated(),
                    connectivity = ?connectivity,
                    "Persisting error record locally"
                );
                return self.persist(record, false).await;
            }
        };

        match self.upload(token, std::slice::from_ref(&record)).await {
            Ok(()) => {
                self.update_stats(|s| s.delivered += 1);
                SubmitOutcome::Delivered
            }
            Err(e) => {
                warn!(error = %e, "Immediate upload failed, falling back to local store");
                self.persist(record, true).await
            }
        }
    }

    /// Write a submitted record to the store, tagging it with the network it
    /// was captured on.
    async fn persist(&self, mut record: ErrorRecord, fallback: bool) -> SubmitOutcome {
        record.prefix_remark(&format!(
            "db_log_network:{} ",
            self.device.connection_type()
        ));

        match self.store.append(&record).await {
            Ok(id) => {
                self.update_stats(|s| {
                    s.persisted += 1;
                    if fallback {
                        s.fallbacks += 1;
                    }
                });
                SubmitOutcome::Persisted { id, fallback }
            }
            Err(e) => {
                error!(error = %e, message = %record.message, "Failed to persist error record");
                self.update_stats(|s| s.dropped += 1);
                SubmitOutcome::Dropped
            }
        }
    }

    /// Shape `records` for the collector and send them in one attempt.
    async fn upload(&self, token: &str, records: &[ErrorRecord]) -> Result<(), UploadError> {
        let device_info = self.device.device_info();
        let server_records: Vec<ServerRecord> = records
            .iter()
            .map(|r| ServerRecord::from_record(r, &device_info))
            .collect();

        self.sink.send(token, &server_records).await?;
        Ok(())
    }

    /// Record a failure of the pipeline itself in the local store.
    ///
    /// Appended directly, never routed through `submit`, so a failure to
    /// record a failure is only traced.
    async fn record_internal(&self, message: String) {
        let mut record = ErrorRecord::new(message);
        record.occurred_at = Some(now_local());
        record.prefix_remark(&format!(
            "db_log_network:{} ",
            self.device.connection_type()
        ));

        if let Err(e) = self.store.append(&record).await {
            error!(error = %e, message = %record.message, "Failed to record pipeline failure");
        }
    }

    /// Upload stored records in batches of `batch_size` until the store is
    /// empty, connectivity stops being unmetered, or a batch fails.
    ///
    /// A failed batch stays in the store and is retried on the next call;
    /// there is no retry within one invocation.
    pub async fn drain_all(&self, batch_size: usize) -> DrainReport {
        let _guard = match self.drain_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Drain already in progress, skipping");
                return DrainReport::new(DrainStop::Busy);
            }
        };

        if let Err(e) = self.ensure_ready().await {
            warn!(error = %e, "Store not ready, skipping drain");
            return DrainReport::new(DrainStop::NotReady);
        }

        let batch_size = batch_size.max(1);
        let mut report = DrainReport::new(DrainStop::Drained);

        let stop = loop {
            let connectivity = self.device.connectivity();
            if connectivity != ConnectivityClass::Unmetered {
                info!(connectivity = ?connectivity, "Not on an unmetered network, drain stopped");
                break DrainStop::NotUnmetered;
            }

            let batch = match self.store.select_batch(batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to select drain batch");
                    self.record_internal(format!("drain: {}", e)).await;
                    break DrainStop::Failed(e.into());
                }
            };

            if batch.is_empty() {
                break DrainStop::Drained;
            }

            let batch_id = batch.batch_id;
            let ids = batch.ids();
            debug!(%batch_id, count = batch.len(), "Uploading stored batch");

            // Logged out is a state, not a failure: nothing is recorded
            let session = self.session.current();
            let token = match session.token() {
                Some(token) => token,
                None => {
                    warn!(%batch_id, "No active session, drain halted");
                    break DrainStop::Failed(UploadError::from(AuthError::Unauthenticated).into());
                }
            };

            if let Err(e) = self.upload(token, &batch.records).await {
                warn!(%batch_id, error = %e, "Batch upload failed, drain halted");
                self.record_internal(format!("upload: {}", e)).await;
                break DrainStop::Failed(e.into());
            }

            match self.store.delete_batch(&ids).await {
                Ok(0) => {
                    warn!(%batch_id, uploaded = ids.len(), "Uploaded batch deleted nothing");
                    self.record_internal(format!(
                        "drain: deleted 0 of {} uploaded records",
                        ids.len()
                    ))
                    .await;
                }
                Ok(deleted) => {
                    debug!(%batch_id, deleted, "Uploaded batch removed from store");
                    self.update_stats(|s| s.records_drained += deleted as u64);
                }
                Err(e) => {
                    error!(%batch_id, error = %e, "Failed to delete uploaded batch");
                    self.record_internal(format!("drain: {}", e)).await;
                    break DrainStop::Failed(e.into());
                }
            }

            report.batches += 1;
            report.records_uploaded += ids.len();
            self.update_stats(|s| s.batches_uploaded += 1);
        };
        report.stop = stop;

        if matches!(report.stop, DrainStop::Failed(_)) {
            self.update_stats(|s| s.drain_failures += 1);
        }

        info!(
            batches = report.batches,
            records = report.records_uploaded,
            stop = ?report.stop,
            "Drain finished"
        );
        report
    }
}
