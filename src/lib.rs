//! Error Telemetry Library
//!
//! This library provides the components of an on-device error reporting
//! pipeline that tolerates bad networks and missing logins:
//!
//! - **normalizer**: Turns raw captures (script errors, framework errors, HTTP failures) into records
//! - **store**: Durable SQLite queue of records awaiting upload
//! - **coordinator**: Routes each record to the collector or the store, and drains the store in batches
//! - **sink**: HTTP client for the remote collector
//! - **trigger**: Timer and on-demand drain scheduling
//! - **reporter**: Non-blocking handle capture sources report through
//! - **device** / **session**: Platform readiness, connectivity and login state
//! - **config**: Environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use error_telemetry::config::Config;
//! use error_telemetry::coordinator::UploadCoordinator;
//! use error_telemetry::device::PlatformDevice;
//! use error_telemetry::normalizer::RawError;
//! use error_telemetry::reporter::Reporter;
//! use error_telemetry::session::StaticSession;
//! use error_telemetry::sink::HttpSink;
//! use error_telemetry::store::LogStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let device = PlatformDevice::new("1.0.0", config.network);
//!     device.mark_ready();
//!
//!     let sink = HttpSink::new(&config).expect("Failed to create sink");
//!     let coordinator = UploadCoordinator::new(
//!         LogStore::open_file(&config.db_path),
//!         Arc::new(device),
//!         Arc::new(StaticSession::default()),
//!         Arc::new(sink),
//!     );
//!
//!     // Capture an error, then drain whatever is queued
//!     let reporter = Reporter::new(Arc::new(coordinator));
//!     reporter
//!         .report(RawError::Other(serde_json::json!("something broke")))
//!         .await
//!         .ok();
//!     reporter.coordinator().drain_all(config.count_per_commit).await;
//! }
//! ```

// Module declarations
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod normalizer;
pub mod record;
pub mod reporter;
pub mod session;
pub mod sink;
pub mod store;
pub mod trigger;

// Re-export commonly used types at crate root for convenience
pub use config::{Config, ConfigError};
pub use coordinator::{DrainReport, DrainStop, PipelineStats, SubmitOutcome, UploadCoordinator};
pub use device::{ConnectionType, ConnectivityClass, DeviceContext, PlatformDevice};
pub use error::{AuthError, DrainError, StoreError, TransportError, UploadError};
pub use normalizer::{normalize, CaptureSource, RawError};
pub use record::{Batch, ErrorRecord, ServerRecord};
pub use reporter::Reporter;
pub use session::{Session, SessionContext, StaticSession, StoredSession};
pub use sink::{HttpSink, RemoteSink};
pub use store::LogStore;
pub use trigger::{drain_task, DrainTrigger, TriggerError};
