//! Configuration module for the error-telemetry service.
//!
//! This module provides environment-based configuration: collector endpoint,
//! local store location, drain batch size and the timers that drive the
//! pipeline.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::device::ConnectionType;
pub use crate::error::ConfigError;
use crate::sink::UPLOAD_PATH;

/// Default base URL of the remote collector
const DEFAULT_COLLECTOR_URL: &str = "http://localhost:8080";

/// Default path of the local SQLite queue
const DEFAULT_DB_PATH: &str = "_log.db";

/// Default number of records uploaded per drain batch
const DEFAULT_COUNT_PER_COMMIT: usize = 1000;

/// Maximum allowed batch size to keep request bodies bounded
const MAX_COUNT_PER_COMMIT: usize = 10_000;

/// Default seconds between timer-triggered drains
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 300;

/// Minimum drain interval to avoid hammering the collector
const MIN_DRAIN_INTERVAL_SECS: u64 = 1;

/// Maximum drain interval so records do not sit on-device for days
const MAX_DRAIN_INTERVAL_SECS: u64 = 86_400;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum HTTP request timeout in seconds
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default readiness wait in seconds
const DEFAULT_READY_TIMEOUT_SECS: u64 = 10;

/// Maximum readiness wait in seconds
const MAX_READY_TIMEOUT_SECS: u64 = 300;

/// Configuration for the error-telemetry pipeline.
///
/// All settings can be configured via environment variables:
/// - `ERROR_TELEMETRY_COLLECTOR_URL`: collector base URL (default: http://localhost:8080)
/// - `ERROR_TELEMETRY_DB_PATH`: local queue database (default: _log.db)
/// - `ERROR_TELEMETRY_COUNT_PER_COMMIT`: records per drain batch (default: 1000)
/// - `ERROR_TELEMETRY_DRAIN_INTERVAL_SECS`: seconds between drains (default: 300)
/// - `ERROR_TELEMETRY_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
/// - `ERROR_TELEMETRY_READY_TIMEOUT_SECS`: device readiness wait (default: 10)
/// - `ERROR_TELEMETRY_SESSION_FILE`: stored session credential blob (optional)
/// - `ERROR_TELEMETRY_NETWORK`: connection type reported by the device (default: wifi)
/// - `ERROR_TELEMETRY_APP_VERSION`: native app build version (optional)
/// - `ERROR_TELEMETRY_VERSION_STAMP_FILE`: stored web bundle version stamp (optional)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote collector
    pub collector_url: String,

    /// Full URL of the batch upload endpoint
    pub upload_url: String,

    /// Path of the local SQLite queue
    pub db_path: PathBuf,

    /// Number of records per drain batch
    pub count_per_commit: usize,

    /// Time between timer-triggered drains
    pub drain_interval: Duration,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// How long to wait for the device readiness signal
    pub ready_timeout: Duration,

    /// Stored session credential blob, if the host keeps one
    pub session_file: Option<PathBuf>,

    /// Connection type the device reports
    pub network: ConnectionType,

    /// Native app build version
    pub app_version: Option<String>,

    /// Stored web bundle version stamp
    pub version_stamp_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a numeric variable is malformed or out of
    /// range, or if the network type is not recognized.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let collector_url = lookup("ERROR_TELEMETRY_COLLECTOR_URL")
            .unwrap_or_else(|| DEFAULT_COLLECTOR_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let upload_url = format!("{}{}", collector_url, UPLOAD_PATH);

        let db_path = lookup("ERROR_TELEMETRY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let count_per_commit = parse_bounded(
            &lookup,
            "ERROR_TELEMETRY_COUNT_PER_COMMIT",
            DEFAULT_COUNT_PER_COMMIT,
            1,
            MAX_COUNT_PER_COMMIT,
        )?;

        let drain_interval_secs = parse_bounded(
            &lookup,
            "ERROR_TELEMETRY_DRAIN_INTERVAL_SECS",
            DEFAULT_DRAIN_INTERVAL_SECS,
            MIN_DRAIN_INTERVAL_SECS,
            MAX_DRAIN_INTERVAL_SECS,
        )?;

        let request_timeout_secs = parse_bounded(
            &lookup,
            "ERROR_TELEMETRY_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;

        let ready_timeout_secs = parse_bounded(
            &lookup,
            "ERROR_TELEMETRY_READY_TIMEOUT_SECS",
            DEFAULT_READY_TIMEOUT_SECS,
            0,
            MAX_READY_TIMEOUT_SECS,
        )?;

        let network = match lookup("ERROR_TELEMETRY_NETWORK") {
            Some(value) => value.parse().map_err(|message| ConfigError {
                message,
                env_var: Some("ERROR_TELEMETRY_NETWORK".to_string()),
            })?,
            None => ConnectionType::Wifi,
        };

        Ok(Self {
            collector_url,
            upload_url,
            db_path,
            count_per_commit,
            drain_interval: Duration::from_secs(drain_interval_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            ready_timeout: Duration::from_secs(ready_timeout_secs),
            session_file: lookup("ERROR_TELEMETRY_SESSION_FILE").map(PathBuf::from),
            network,
            app_version: lookup("ERROR_TELEMETRY_APP_VERSION").filter(|v| !v.is_empty()),
            version_stamp_file: lookup("ERROR_TELEMETRY_VERSION_STAMP_FILE").map(PathBuf::from),
        })
    }
}

/// Parse a numeric variable, falling back to `default` when unset and
/// rejecting values outside `min..=max`.
fn parse_bounded<F, T>(lookup: &F, env_var: &str, default: T, min: T, max: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value = match lookup(env_var) {
        Some(value) => value,
        None => return Ok(default),
    };

    let parsed: T = value.trim().parse().map_err(|_| ConfigError {
        message: format!("'{}' is not a valid number", value),
        env_var: Some(env_var.to_string()),
    })?;

    if parsed < min {
        return Err(ConfigError {
            message: format!("{} is below minimum ({})", parsed, min),
            env_var: Some(env_var.to_string()),
        });
    }

    if parsed > max {
        return Err(ConfigError {
            message: format!("{} exceeds maximum ({})", parsed, max),
            env_var: Some(env_var.to_string()),
        });
    }

    Ok(parsed)
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            upload_url: format!("{}{}", DEFAULT_COLLECTOR_URL, UPLOAD_PATH),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            count_per_commit: DEFAULT_COUNT_PER_COMMIT,
            drain_interval: Duration::from_secs(DEFAULT_DRAIN_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            session_file: None,
            network: ConnectionType::Wifi,
            app_version: None,
            version_stamp_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collector_url, "http://localhost:8080");
        assert_eq!(config.count_per_commit, 1000);
        assert_eq!(config.drain_interval, Duration::from_secs(300));
        assert_eq!(config.ready_timeout, Duration::from_secs(10));
        assert_eq!(config.network, ConnectionType::Wifi);
    }

    #[test]
    fn test_config_from_vars_with_defaults() {
        let config = load(&[]).expect("Should load with defaults");
        assert_eq!(config.collector_url, "http://localhost:8080");
        assert_eq!(
            config.upload_url,
            "http://localhost:8080/log/upload-log-error-list"
        );
        assert_eq!(config.db_path, PathBuf::from("_log.db"));
        assert_eq!(config.count_per_commit, 1000);
        assert!(config.session_file.is_none());
    }

    #[test]
    fn test_config_from_vars_custom_values() {
        let config = load(&[
            ("ERROR_TELEMETRY_COLLECTOR_URL", "https://logs.example.com/api/"),
            ("ERROR_TELEMETRY_COUNT_PER_COMMIT", "250"),
            ("ERROR_TELEMETRY_DRAIN_INTERVAL_SECS", "60"),
            ("ERROR_TELEMETRY_NETWORK", "4g"),
            ("ERROR_TELEMETRY_SESSION_FILE", "/data/user.json"),
            ("ERROR_TELEMETRY_APP_VERSION", "3.1.0"),
        ])
        .expect("Should load custom values");

        assert_eq!(config.collector_url, "https://logs.example.com/api"); // Trailing slash removed
        assert_eq!(
            config.upload_url,
            "https://logs.example.com/api/log/upload-log-error-list"
        );
        assert_eq!(config.count_per_commit, 250);
        assert_eq!(config.drain_interval, Duration::from_secs(60));
        assert_eq!(config.network, ConnectionType::Cell4g);
        assert_eq!(config.session_file, Some(PathBuf::from("/data/user.json")));
        assert_eq!(config.app_version.as_deref(), Some("3.1.0"));
    }

    #[test]
    fn test_invalid_count_per_commit() {
        let err = load(&[("ERROR_TELEMETRY_COUNT_PER_COMMIT", "lots")]).unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some("ERROR_TELEMETRY_COUNT_PER_COMMIT"));
    }

    #[test]
    fn test_zero_count_per_commit() {
        let err = load(&[("ERROR_TELEMETRY_COUNT_PER_COMMIT", "0")]).unwrap_err();
        assert!(err.message.contains("below minimum"));
    }

    #[test]
    fn test_count_per_commit_exceeds_max() {
        let err = load(&[("ERROR_TELEMETRY_COUNT_PER_COMMIT", "99999")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_drain_interval_bounds() {
        let err = load(&[("ERROR_TELEMETRY_DRAIN_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.message.contains("below minimum"));

        let err = load(&[("ERROR_TELEMETRY_DRAIN_INTERVAL_SECS", "100000")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_timeout_bounds() {
        let err = load(&[("ERROR_TELEMETRY_REQUEST_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.message.contains("below minimum"));

        let err = load(&[("ERROR_TELEMETRY_REQUEST_TIMEOUT_SECS", "18446744073709551615")])
            .unwrap_err();
        assert!(err.message.contains("exceeds maximum"));

        let err = load(&[("ERROR_TELEMETRY_READY_TIMEOUT_SECS", "301")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
        assert_eq!(err.env_var.as_deref(), Some("ERROR_TELEMETRY_READY_TIMEOUT_SECS"));

        let config = load(&[
            ("ERROR_TELEMETRY_REQUEST_TIMEOUT_SECS", "300"),
            ("ERROR_TELEMETRY_READY_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.ready_timeout, Duration::ZERO);
    }

    #[test]
    fn test_unknown_network() {
        let err = load(&[("ERROR_TELEMETRY_NETWORK", "carrier-pigeon")]).unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("ERROR_TELEMETRY_NETWORK"));
    }

    #[test]
    fn test_empty_app_version_is_unset() {
        let config = load(&[("ERROR_TELEMETRY_APP_VERSION", "")]).unwrap();
        assert!(config.app_version.is_none());
    }
}
