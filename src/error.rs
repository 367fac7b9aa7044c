//! Error taxonomy for the telemetry pipeline.
//!
//! None of these errors ever reach a capture source. Submission failures fall
//! back to the local store, drain failures end the current drain cycle and are
//! retried on the next trigger.

use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the local SQLite queue.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The device never signalled readiness, so the store was not opened
    #[error("device not ready, local store unavailable")]
    NotReady,

    /// Opening the database or creating its schema failed
    #[error("failed to open local store: {0}")]
    Open(#[source] rusqlite::Error),

    /// A statement against an open store failed
    #[error("local store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// A previous panic left the connection lock poisoned
    #[error("local store connection lock poisoned")]
    Poisoned,

    /// The blocking task running the statement panicked or was cancelled
    #[error("local store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures talking to the remote collector.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Collector answered with a non-success status code
    #[error("collector error ({code}): {body}")]
    Status { code: StatusCode, body: String },

    /// Collector answered 2xx but reported an application-level error
    #[error("collector rejected upload: {errmsg}")]
    Rejected { errmsg: String },

    /// Response body was not the expected JSON
    #[error("failed to parse collector response: {0}")]
    Parse(String),

    /// HTTP client could not be built
    #[error("client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(err)
        }
    }
}

/// No usable credential for the collector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no active session, upload requires an access token")]
    Unauthenticated,
}

/// Why a send to the collector did not succeed.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why a drain cycle stopped early.
#[derive(Error, Debug)]
pub enum DrainError {
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// Configuration loading failure, naming the offending variable when known.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}
