//! Remote collector boundary.
//!
//! [`RemoteSink`] is the only capability the pipeline needs from the network:
//! send one batch, get back success or failure. [`HttpSink`] implements it
//! against the collector's upload endpoint with a single attempt per call;
//! retries happen at batch level on the next drain trigger.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TransportError;
use crate::record::ServerRecord;

/// Path of the batch upload endpoint, relative to the collector base URL.
pub const UPLOAD_PATH: &str = "/log/upload-log-error-list";

/// Accepts batches of records for the remote collector.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Deliver `records` using `access_token`. One attempt, no retries.
    async fn send(&self, access_token: &str, records: &[ServerRecord])
        -> Result<(), TransportError>;
}

/// HTTP implementation of [`RemoteSink`].
///
/// The underlying reqwest client is reused across calls for connection
/// pooling. Every request is bounded by the configured timeout.
pub struct HttpSink {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Full URL of the upload endpoint
    upload_url: String,

    /// Request timeout duration
    timeout: Duration,
}

impl HttpSink {
    /// Create a sink from configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        Self::with_settings(config.upload_url.clone(), config.request_timeout)
    }

    /// Create a sink posting to an explicit endpoint URL.
    pub fn with_settings(
        upload_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            upload_url: upload_url.into(),
            timeout,
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn send(
        &self,
        access_token: &str,
        records: &[ServerRecord],
    ) -> Result<(), TransportError> {
        debug!(
            count = records.len(),
            url = %self.upload_url,
            "Uploading error records"
        );

        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("access_token", access_token)])
            .timeout(self.timeout)
            .json(records)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = %status, "Collector returned error status");
            return Err(TransportError::Status { code: status, body });
        }

        check_collector_body(&body)?;

        info!(count = records.len(), "Uploaded error records");
        Ok(())
    }
}

/// Interpret a 2xx collector response body.
///
/// The collector signals application-level failure with an `errmsg` field;
/// an empty or `null` body is also treated as a failure.
pub fn check_collector_body(body: &str) -> Result<(), TransportError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| TransportError::Parse(e.to_string()))?;

    if value.is_null() {
        return Err(TransportError::Parse("empty response body".to_string()));
    }

    match value.get("errmsg") {
        None | Some(serde_json::Value::Null) => Ok(()),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(()),
        Some(serde_json::Value::String(s)) => Err(TransportError::Rejected { errmsg: s.clone() }),
        Some(other) => Err(TransportError::Rejected {
            errmsg: other.to_string(),
        }),
    }
}
