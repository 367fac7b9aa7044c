//! Device context: readiness, app version and connectivity.
//!
//! The pipeline reads connectivity fresh at every routing decision and never
//! caches it. Readiness is the one suspension point; a timeout means "not
//! ready" rather than an error.

use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Default time to wait for the platform readiness signal.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Web bundle version used when no matching stamp is stored.
const DEFAULT_WEB_VERSION: &str = "00";

/// Network class used for routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityClass {
    /// Safe for background data use
    Unmetered,
    /// Data costs money
    Metered,
    /// Offline or undetermined
    Unknown,
}

/// Raw connection label as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Unknown,
    Ethernet,
    Wifi,
    #[serde(rename = "2g")]
    Cell2g,
    #[serde(rename = "3g")]
    Cell3g,
    #[serde(rename = "4g")]
    Cell4g,
    Cellular,
    None,
}

impl ConnectionType {
    pub fn class(&self) -> ConnectivityClass {
        match self {
            ConnectionType::Wifi | ConnectionType::Ethernet => ConnectivityClass::Unmetered,
            ConnectionType::Cell2g
            | ConnectionType::Cell3g
            | ConnectionType::Cell4g
            | ConnectionType::Cellular => ConnectivityClass::Metered,
            ConnectionType::Unknown | ConnectionType::None => ConnectivityClass::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Unknown => "unknown",
            ConnectionType::Ethernet => "ethernet",
            ConnectionType::Wifi => "wifi",
            ConnectionType::Cell2g => "2g",
            ConnectionType::Cell3g => "3g",
            ConnectionType::Cell4g => "4g",
            ConnectionType::Cellular => "cellular",
            ConnectionType::None => "none",
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(ConnectionType::Unknown),
            "ethernet" => Ok(ConnectionType::Ethernet),
            "wifi" => Ok(ConnectionType::Wifi),
            "2g" => Ok(ConnectionType::Cell2g),
            "3g" => Ok(ConnectionType::Cell3g),
            "4g" => Ok(ConnectionType::Cell4g),
            "cellular" => Ok(ConnectionType::Cellular),
            "none" => Ok(ConnectionType::None),
            other => Err(format!("unrecognized connection type '{}'", other)),
        }
    }
}

/// Stored record of which web bundle was installed on top of which app build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub app_version: String,
    #[serde(default)]
    pub web_version: Option<String>,
}

/// Combine the native app version with the installed web bundle version.
///
/// The web version only counts when the stamp was written for this exact app
/// build; otherwise the bundle is assumed to be the one shipped with the app.
pub fn resolve_app_version(app_version: Option<&str>, stamp: Option<&VersionStamp>) -> String {
    let app_version = match app_version.filter(|v| !v.is_empty()) {
        Some(v) => v,
        None => return "unknown".to_string(),
    };

    let web_version = stamp
        .filter(|s| s.app_version == app_version)
        .and_then(|s| s.web_version.as_deref())
        .filter(|w| !w.is_empty())
        .unwrap_or(DEFAULT_WEB_VERSION);

    format!("{}{}", app_version, web_version)
}

/// Platform state the pipeline depends on.
#[async_trait]
pub trait DeviceContext: Send + Sync {
    /// Wait up to `timeout` for the platform to signal readiness.
    async fn ready(&self, timeout: Duration) -> bool;

    /// Resolved app/build version string.
    fn app_version(&self) -> String;

    /// Current raw connection label.
    fn connection_type(&self) -> ConnectionType;

    /// Current network class.
    fn connectivity(&self) -> ConnectivityClass {
        self.connection_type().class()
    }

    /// Device description sent with every uploaded record.
    fn device_info(&self) -> serde_json::Map<String, serde_json::Value>;
}

/// Device context driven by host callbacks.
///
/// The host calls [`PlatformDevice::mark_ready`] once its plugins are up and
/// [`PlatformDevice::set_connection_type`] whenever the network changes.
pub struct PlatformDevice {
    ready_tx: watch::Sender<bool>,
    connection: RwLock<ConnectionType>,
    app_version: String,
    info: serde_json::Map<String, serde_json::Value>,
}

impl PlatformDevice {
    pub fn new(app_version: impl Into<String>, connection: ConnectionType) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            ready_tx,
            connection: RwLock::new(connection),
            app_version: app_version.into(),
            info: serde_json::Map::new(),
        }
    }

    /// Attach static device fields (platform, model, OS version, ...).
    pub fn with_info(mut self, info: serde_json::Map<String, serde_json::Value>) -> Self {
        self.info = info;
        self
    }

    /// Signal that the platform is ready. Idempotent.
    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
        debug!("Device ready");
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn set_connection_type(&self, connection: ConnectionType) {
        match self.connection.write() {
            Ok(mut guard) => *guard = connection,
            Err(poisoned) => *poisoned.into_inner() = connection,
        }
    }
}

#[async_trait]
impl DeviceContext for PlatformDevice {
    async fn ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready_tx.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        if !ready {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Device was not ready in time"
            );
        }
        ready
    }

    fn app_version(&self) -> String {
        self.app_version.clone()
    }

    fn connection_type(&self) -> ConnectionType {
        match self.connection.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn device_info(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut info = self.info.clone();
        info.insert("app_version".to_string(), self.app_version().into());
        info.insert(
            "upload_log_network".to_string(),
            self.connection_type().as_str().into(),
        );
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_connection_classes() {
        assert_eq!(ConnectionType::Wifi.class(), ConnectivityClass::Unmetered);
        assert_eq!(ConnectionType::Ethernet.class(), ConnectivityClass::Unmetered);
        assert_eq!(ConnectionType::Cell4g.class(), ConnectivityClass::Metered);
        assert_eq!(ConnectionType::Cellular.class(), ConnectivityClass::Metered);
        assert_eq!(ConnectionType::None.class(), ConnectivityClass::Unknown);
        assert_eq!(ConnectionType::Unknown.class(), ConnectivityClass::Unknown);
    }

    #[test]
    fn test_connection_type_parsing() {
        assert_eq!("WiFi".parse::<ConnectionType>(), Ok(ConnectionType::Wifi));
        assert_eq!("3g".parse::<ConnectionType>(), Ok(ConnectionType::Cell3g));
        assert!("satellite".parse::<ConnectionType>().is_err());
        assert_eq!(
            serde_json::to_string(&ConnectionType::Cell2g).unwrap(),
            r#""2g""#
        );
    }

    #[test]
    fn test_resolve_app_version() {
        let stamp = VersionStamp {
            app_version: "1.4.0".to_string(),
            web_version: Some("07".to_string()),
        };

        assert_eq!(resolve_app_version(None, Some(&stamp)), "unknown");
        assert_eq!(resolve_app_version(Some("1.4.0"), Some(&stamp)), "1.4.007");
        assert_eq!(resolve_app_version(Some("1.5.0"), Some(&stamp)), "1.5.000");
        assert_eq!(resolve_app_version(Some("1.4.0"), None), "1.4.000");
    }

    #[tokio::test]
    async fn test_ready_times_out() {
        let device = PlatformDevice::new("1.000", ConnectionType::Wifi);
        assert!(!device.ready(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_ready_resolves_on_signal() {
        let device = Arc::new(PlatformDevice::new("1.000", ConnectionType::Wifi));

        let waiter = {
            let device = device.clone();
            tokio::spawn(async move { device.ready(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        device.mark_ready();

        assert!(waiter.await.unwrap());
        // Already ready: resolves immediately
        assert!(device.ready(Duration::from_millis(1)).await);
    }

    #[test]
    fn test_device_info_reflects_current_network() {
        let mut info = serde_json::Map::new();
        info.insert("platform".to_string(), "Android".into());
        let device = PlatformDevice::new("2.0.001", ConnectionType::Wifi).with_info(info);

        device.set_connection_type(ConnectionType::Cell4g);
        let info = device.device_info();

        assert_eq!(info["platform"], "Android");
        assert_eq!(info["app_version"], "2.0.001");
        assert_eq!(info["upload_log_network"], "4g");
        assert_eq!(device.connectivity(), ConnectivityClass::Metered);
    }
}
