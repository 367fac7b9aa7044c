//! Drain triggering.
//!
//! Drains are started by a periodic timer and by explicit "drain now"
//! requests (app resume, connectivity regained, ...). Both feed a single task
//! built on tokio mpsc channels and `select!`, so drains run one after
//! another and never in parallel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::coordinator::{DrainReport, UploadCoordinator};

/// Default channel capacity for pending drain requests.
///
/// Requests arriving while the channel is full are redundant: a drain is
/// already queued.
const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Why a drain request was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// A drain is already queued
    #[error("drain request channel is full")]
    Full,

    /// The drain task has stopped
    #[error("drain task has stopped")]
    Closed,
}

/// Handle for requesting an immediate drain.
///
/// This can be cloned and shared with lifecycle hooks.
#[derive(Clone)]
pub struct DrainTrigger {
    tx: mpsc::Sender<()>,
}

impl DrainTrigger {
    /// Create a trigger and the receiver to hand to [`drain_task`].
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Request a drain, waiting if the request channel is full.
    pub async fn send(&self) -> Result<(), TriggerError> {
        self.tx.send(()).await.map_err(|_| TriggerError::Closed)
    }

    /// Request a drain without waiting.
    pub fn try_send(&self) -> Result<(), TriggerError> {
        self.tx.try_send(()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TriggerError::Full,
            mpsc::error::TrySendError::Closed(_) => TriggerError::Closed,
        })
    }
}

/// Run drains on every timer tick and every request until all
/// [`DrainTrigger`]s are dropped, then run one final drain and return.
///
/// Returns the number of drains performed.
pub async fn drain_task(
    coordinator: Arc<UploadCoordinator>,
    mut requests: mpsc::Receiver<()>,
    drain_interval: Duration,
    batch_size: usize,
) -> u64 {
    let mut ticker = interval(drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut drains: u64 = 0;

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            request = requests.recv() => {
                match request {
                    Some(()) => {
                        debug!("Drain requested");
                        run_drain(&coordinator, batch_size).await;
                        drains += 1;
                    }
                    None => {
                        info!("Drain triggers closed, running final drain");
                        run_drain(&coordinator, batch_size).await;
                        drains += 1;
                        return drains;
                    }
                }
            }

            _ = ticker.tick() => {
                debug!(interval_secs = drain_interval.as_secs(), "Timer-triggered drain");
                run_drain(&coordinator, batch_size).await;
                drains += 1;
            }
        }
    }
}

async fn run_drain(coordinator: &UploadCoordinator, batch_size: usize) -> DrainReport {
    coordinator.drain_all(batch_size).await
}
