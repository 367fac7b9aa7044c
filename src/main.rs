//! Error Telemetry - on-device error delivery service
//!
//! This service reads raw error captures as newline-delimited JSON on stdin,
//! routes each one to the remote collector or the local queue, and drains the
//! queue on a timer.
//!
//! ## Features
//!
//! - Immediate upload on unmetered networks with a logged-in session
//! - Durable SQLite queue for everything else
//! - Bounded-batch draining, one attempt per batch
//! - Graceful shutdown on SIGINT or end of input, with a final drain
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `ERROR_TELEMETRY_COLLECTOR_URL`: Collector base URL (default: http://localhost:8080)
//! - `ERROR_TELEMETRY_DB_PATH`: Local queue file (default: _log.db)
//! - `ERROR_TELEMETRY_COUNT_PER_COMMIT`: Records per drain batch (default: 1000)
//! - `ERROR_TELEMETRY_DRAIN_INTERVAL_SECS`: Seconds between drains (default: 300)
//! - `ERROR_TELEMETRY_SESSION_FILE`: Stored session JSON (optional)
//! - `ERROR_TELEMETRY_NETWORK`: Connection type (default: wifi)
//! - `RUST_LOG`: Logging level filter (default: info)
//!
//! A stdin line that is the bare word `drain` requests an immediate drain.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use error_telemetry::config::Config;
use error_telemetry::coordinator::UploadCoordinator;
use error_telemetry::device::{resolve_app_version, PlatformDevice, VersionStamp};
use error_telemetry::normalizer::RawError;
use error_telemetry::reporter::Reporter;
use error_telemetry::session::{SessionContext, StaticSession, StoredSession};
use error_telemetry::sink::HttpSink;
use error_telemetry::store::LogStore;
use error_telemetry::trigger::{drain_task, DrainTrigger};

/// Stdin command requesting an immediate drain
const DRAIN_COMMAND: &str = "drain";

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Error Telemetry service...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                upload_url = %config.upload_url,
                db_path = %config.db_path.display(),
                count_per_commit = config.count_per_commit,
                drain_interval_secs = config.drain_interval.as_secs(),
                network = %config.network,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let sink = match HttpSink::new(&config) {
        Ok(sink) => {
            info!(upload_url = %sink.upload_url(), "HTTP sink initialized");
            Arc::new(sink)
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP sink");
            std::process::exit(1);
        }
    };

    let stamp = config
        .version_stamp_file
        .as_deref()
        .and_then(read_version_stamp);
    let app_version = resolve_app_version(config.app_version.as_deref(), stamp.as_ref());
    let device = PlatformDevice::new(app_version, config.network);
    device.mark_ready();

    let session: Arc<dyn SessionContext> = match &config.session_file {
        Some(path) => Arc::new(StoredSession::new(path)),
        None => Arc::new(StaticSession::default()),
    };

    let coordinator = Arc::new(
        UploadCoordinator::new(
            LogStore::open_file(&config.db_path),
            Arc::new(device),
            session,
            sink,
        )
        .with_ready_timeout(config.ready_timeout),
    );
    let reporter = Reporter::new(coordinator.clone());

    // Spawn drain task - timer and on-demand drains
    let (trigger, requests) = DrainTrigger::new();
    let drain_handle = tokio::spawn(drain_task(
        coordinator.clone(),
        requests,
        config.drain_interval,
        config.count_per_commit,
    ));

    // Drain whatever a previous run left behind
    if let Err(e) = trigger.try_send() {
        warn!(error = %e, "Failed to request startup drain");
    }

    info!("Error Telemetry running. Press Ctrl+C to stop.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received, stopping..."),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
                break;
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_line(&reporter, &trigger, line.trim()),
                    Ok(None) => {
                        info!("End of input, stopping...");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        break;
                    }
                }
            }
        }
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");

    // Let in-flight submissions finish so none is cancelled mid-upload; each is
    // bounded by the readiness wait plus one request timeout
    let submit_timeout = config.ready_timeout + config.request_timeout + Duration::from_secs(1);
    if tokio::time::timeout(submit_timeout, reporter.wait_idle())
        .await
        .is_err()
    {
        warn!(
            pending = reporter.in_flight(),
            "In-flight submissions did not finish within {:?}", submit_timeout
        );
    }

    // Dropping the last trigger makes the drain task run a final drain and exit
    drop(trigger);

    let shutdown_timeout = Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, drain_handle).await {
        Ok(Ok(drains)) => {
            info!(drains, "Drain task shut down gracefully");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Drain task panicked during shutdown");
        }
        Err(_) => {
            warn!("Drain task shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    let stats = coordinator.stats();
    info!(
        submitted = stats.submitted,
        delivered = stats.delivered,
        persisted = stats.persisted,
        dropped = stats.dropped,
        records_drained = stats.records_drained,
        "Error Telemetry stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Dispatch one stdin line: a drain command or a raw error capture.
///
/// Lines that are not a recognized capture are still reported, as an
/// unknown-source error carrying the raw text.
fn handle_line(reporter: &Reporter, trigger: &DrainTrigger, line: &str) {
    if line.is_empty() {
        return;
    }

    if line == DRAIN_COMMAND {
        if let Err(e) = trigger.try_send() {
            debug!(error = %e, "Drain request not queued");
        }
        return;
    }

    let raw = match serde_json::from_str::<RawError>(line) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Input is not a known capture, reporting as text");
            RawError::Other(serde_json::Value::String(line.to_string()))
        }
    };

    // The reporter tracks the submission; the outcome is traced by the coordinator
    drop(reporter.report(raw));
}

/// Read the stored web bundle version stamp, if one exists and parses.
fn read_version_stamp(path: &Path) -> Option<VersionStamp> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No version stamp");
            return None;
        }
    };

    match serde_json::from_str(&contents) {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed version stamp");
            None
        }
    }
}
