//! Normalization of raw captures into [`ErrorRecord`]s.
//!
//! Each capture path hands the pipeline one [`RawError`] variant and each
//! variant has its own mapping function. Normalization never fails: anything
//! unrecognized degrades to a record whose message is the stringified input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::ErrorRecord;

/// Collector error code meaning the user's session has expired.
pub const SESSION_EXPIRED_ERRCODE: i64 = 3002;

/// Separator used when joining positional framework log arguments.
const MESSAGE_SEPARATOR: &str = " ";

/// Where a failure first became observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Uncaught script error at window level
    Window,
    /// In-framework error log call
    Framework,
    /// HTTP interceptor
    Http,
    /// Anything that did not match a known shape
    Unknown,
}

impl CaptureSource {
    /// Prefix placed in front of every message from this source.
    pub fn tag(&self) -> &'static str {
        match self {
            CaptureSource::Window => "window.error ",
            CaptureSource::Framework => "framework.error ",
            CaptureSource::Http => "http.error ",
            CaptureSource::Unknown => "unknown.error ",
        }
    }
}

impl std::fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureSource::Window => write!(f, "window"),
            CaptureSource::Framework => write!(f, "framework"),
            CaptureSource::Http => write!(f, "http"),
            CaptureSource::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failure as handed over by a capture source.
///
/// Input only: captures arrive as JSON tagged by `kind`. An `other` capture
/// keeps its remaining fields as one object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawError {
    /// Uncaught script error with its location
    Script {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        line: Option<i64>,
        #[serde(default)]
        column: Option<i64>,
    },

    /// Positional arguments of one framework error log call
    Framework {
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Request that failed at the transport or status level
    HttpFailure {
        url: String,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        status_text: Option<String>,
        /// Time between issuing the request and the failure
        #[serde(default)]
        elapsed_ms: Option<u64>,
        /// Configured request timeout; zero or negative means none
        #[serde(default)]
        timeout_ms: Option<i64>,
        /// Serialized request/response context
        #[serde(default)]
        context: Value,
    },

    /// Successful HTTP exchange whose body reports an application error
    HttpResult {
        url: String,
        body: Value,
        #[serde(default)]
        request: Value,
    },

    /// Unrecognized capture shape
    Other(Value),
}

impl RawError {
    /// Capture path this error came from.
    pub fn source(&self) -> CaptureSource {
        match self {
            RawError::Script { .. } => CaptureSource::Window,
            RawError::Framework { .. } => CaptureSource::Framework,
            RawError::HttpFailure { .. } | RawError::HttpResult { .. } => CaptureSource::Http,
            RawError::Other(_) => CaptureSource::Unknown,
        }
    }

    /// Whether this capture should bypass immediate upload.
    ///
    /// An expired-session result error can never be uploaded with the current
    /// credential, so it always goes to the local store.
    pub fn prefers_local(&self) -> bool {
        match self {
            RawError::HttpResult { body, .. } => {
                body.get("errcode").and_then(Value::as_i64) == Some(SESSION_EXPIRED_ERRCODE)
            }
            _ => false,
        }
    }
}

/// Convert a raw capture into a canonical record.
pub fn normalize(raw: RawError) -> ErrorRecord {
    let source = raw.source();
    match raw {
        RawError::Script {
            message,
            file,
            line,
            column,
        } => normalize_script(source, message, file, line, column),
        RawError::Framework { args } => normalize_framework(source, &args),
        RawError::HttpFailure {
            url,
            status,
            status_text,
            elapsed_ms,
            timeout_ms,
            context,
        } => normalize_http_failure(
            source,
            url,
            status,
            status_text.as_deref(),
            elapsed_ms,
            timeout_ms,
            &context,
        ),
        RawError::HttpResult { url, body, request } => {
            normalize_http_result(source, url, &body, request)
        }
        RawError::Other(value) => {
            ErrorRecord::new(format!("{}{}", source.tag(), stringify(&value)))
        }
    }
}

fn normalize_script(
    source: CaptureSource,
    message: Option<String>,
    file: Option<String>,
    line: Option<i64>,
    column: Option<i64>,
) -> ErrorRecord {
    let message = message.filter(|m| !m.is_empty()).unwrap_or_else(|| "unknown".to_string());
    let mut record =
        ErrorRecord::new(format!("{}{}", source.tag(), message)).with_location(line, column);
    record.file = file;
    record
}

/// Join framework log arguments into one record.
///
/// The first object carrying a `message` field is the base: its location,
/// stack and remark are kept, arguments before it are joined in front of its
/// message and arguments after it are appended as text.
fn normalize_framework(source: CaptureSource, args: &[Value]) -> ErrorRecord {
    let mut leading: Vec<String> = Vec::new();
    let mut base: Option<(&serde_json::Map<String, Value>, String)> = None;

    for arg in args {
        if let Some((_, message)) = base.as_mut() {
            message.push_str(MESSAGE_SEPARATOR);
            message.push_str(&stringify(arg));
            continue;
        }

        match arg {
            Value::Object(object) if object.contains_key("message") => {
                leading.push(stringify(&object["message"]));
                base = Some((object, leading.join(MESSAGE_SEPARATOR)));
            }
            _ => leading.push(stringify(arg)),
        }
    }

    match base {
        Some((object, message)) => {
            let mut record = ErrorRecord::new(format!("{}{}", source.tag(), message));
            record.file = ["file", "sourceURL", "fileName"]
                .iter()
                .find_map(|key| object.get(*key).and_then(non_empty_text));
            record.line = object.get("line").and_then(Value::as_i64);
            record.column = object.get("column").and_then(Value::as_i64);
            record.stack = object.get("stack").and_then(non_empty_text);
            record.remark = object.get("remark").and_then(non_empty_text);
            record
        }
        None => ErrorRecord::new(format!(
            "{}{}",
            source.tag(),
            leading.join(MESSAGE_SEPARATOR)
        )),
    }
}

fn normalize_http_failure(
    source: CaptureSource,
    url: String,
    status: Option<u16>,
    status_text: Option<&str>,
    elapsed_ms: Option<u64>,
    timeout_ms: Option<i64>,
    context: &Value,
) -> ErrorRecord {
    let mut message = status
        .filter(|s| *s != 0)
        .map(|s| s.to_string())
        .unwrap_or_default();

    if let Some(text) = status_text.filter(|t| !t.is_empty()) {
        message.push_str(&format!("({}) ", text));
    }

    if is_timed_out(elapsed_ms, timeout_ms) {
        message.push_str("timeout");
    }

    if message.is_empty() {
        message.push_str("unknown");
    }

    let mut remark = elapsed_ms
        .filter(|ms| *ms > 0)
        .map(|ms| format!("duration: {}ms ", ms))
        .unwrap_or_default();
    remark.push_str(&context.to_string());

    ErrorRecord::new(format!("{}statusError: {}", source.tag(), message))
        .with_file(url)
        .with_remark(remark)
}

fn normalize_http_result(
    source: CaptureSource,
    url: String,
    body: &Value,
    request: Value,
) -> ErrorRecord {
    let remark = serde_json::json!({ "config": request }).to_string();

    ErrorRecord::new(format!("{}resultError: {}", source.tag(), body))
        .with_file(url)
        .with_remark(remark)
}

/// A request timed out when its elapsed time meets or exceeds a configured,
/// positive timeout. Zero, `-1` and other negative values mean no timeout.
pub fn is_timed_out(elapsed_ms: Option<u64>, timeout_ms: Option<i64>) -> bool {
    match (elapsed_ms, timeout_ms) {
        (Some(elapsed), Some(timeout)) if timeout > 0 => elapsed >= timeout as u64,
        _ => false,
    }
}

/// Strings verbatim, everything else as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_empty_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(stringify(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http_failure(elapsed_ms: Option<u64>, timeout_ms: Option<i64>) -> RawError {
        RawError::HttpFailure {
            url: "https://api.example.com/orders".to_string(),
            status: Some(0),
            status_text: None,
            elapsed_ms,
            timeout_ms,
            context: json!({"method": "GET"}),
        }
    }

    #[test]
    fn test_script_error_is_tagged() {
        let record = normalize(RawError::Script {
            message: Some("Uncaught TypeError: x is undefined".to_string()),
            file: Some("app.js".to_string()),
            line: Some(42),
            column: Some(7),
        });

        assert_eq!(record.message, "window.error Uncaught TypeError: x is undefined");
        assert_eq!(record.file.as_deref(), Some("app.js"));
        assert_eq!(record.line, Some(42));
        assert_eq!(record.column, Some(7));
        assert!(record.id.is_none());
    }

    #[test]
    fn test_script_error_without_message() {
        let record = normalize(RawError::Script {
            message: None,
            file: None,
            line: None,
            column: None,
        });
        assert_eq!(record.message, "window.error unknown");
    }

    #[test]
    fn test_framework_plain_arguments_are_joined() {
        let record = normalize(RawError::Framework {
            args: vec![json!("load failed"), json!(404), json!({"id": 1})],
        });
        assert_eq!(record.message, r#"framework.error load failed 404 {"id":1}"#);
    }

    #[test]
    fn test_framework_first_message_object_is_base() {
        let record = normalize(RawError::Framework {
            args: vec![
                json!("while saving"),
                json!({"message": "disk full", "stack": "at save()", "line": 3, "sourceURL": "db.js"}),
                json!("retrying"),
                json!({"message": "second"}),
            ],
        });

        assert_eq!(
            record.message,
            r#"framework.error while saving disk full retrying {"message":"second"}"#
        );
        assert_eq!(record.stack.as_deref(), Some("at save()"));
        assert_eq!(record.line, Some(3));
        assert_eq!(record.file.as_deref(), Some("db.js"));
    }

    #[test]
    fn test_framework_without_arguments_still_has_message() {
        let record = normalize(RawError::Framework { args: vec![] });
        assert_eq!(record.message, "framework.error ");
        assert!(!record.message.is_empty());
    }

    #[test]
    fn test_http_failure_status_message() {
        let record = normalize(RawError::HttpFailure {
            url: "https://api.example.com/orders".to_string(),
            status: Some(500),
            status_text: Some("Internal Server Error".to_string()),
            elapsed_ms: Some(120),
            timeout_ms: Some(30_000),
            context: json!({"status": 500}),
        });

        assert_eq!(
            record.message,
            "http.error statusError: 500(Internal Server Error) "
        );
        assert_eq!(record.file.as_deref(), Some("https://api.example.com/orders"));
        assert_eq!(
            record.remark.as_deref(),
            Some(r#"duration: 120ms {"status":500}"#)
        );
    }

    #[test]
    fn test_http_failure_timeout_marker() {
        let at_limit = normalize(http_failure(Some(30_000), Some(30_000)));
        assert!(at_limit.message.contains("timeout"));

        let over_limit = normalize(http_failure(Some(31_000), Some(30_000)));
        assert!(over_limit.message.contains("timeout"));

        let under_limit = normalize(http_failure(Some(29_999), Some(30_000)));
        assert!(!under_limit.message.contains("timeout"));
        assert_eq!(under_limit.message, "http.error statusError: unknown");
    }

    #[test]
    fn test_http_failure_without_configured_timeout() {
        assert!(!is_timed_out(Some(50_000), Some(-1)));
        assert!(!is_timed_out(Some(5), Some(0)));
        assert!(!normalize(http_failure(Some(5), Some(0))).message.contains("timeout"));
        assert!(!is_timed_out(Some(50_000), None));
        assert!(!is_timed_out(None, Some(10)));
    }

    #[test]
    fn test_http_result_error() {
        let raw = RawError::HttpResult {
            url: "https://api.example.com/me".to_string(),
            body: json!({"errcode": 3002, "errmsg": "session expired"}),
            request: json!({"method": "GET"}),
        };
        assert!(raw.prefers_local());

        let record = normalize(raw);
        assert!(record.message.starts_with("http.error resultError: "));
        assert!(record.message.contains("session expired"));
        assert_eq!(
            record.remark.as_deref(),
            Some(r#"{"config":{"method":"GET"}}"#)
        );
    }

    #[test]
    fn test_other_errcode_does_not_prefer_local() {
        let raw = RawError::HttpResult {
            url: "u".to_string(),
            body: json!({"errcode": 1, "errmsg": "bad"}),
            request: Value::Null,
        };
        assert!(!raw.prefers_local());
    }

    #[test]
    fn test_unknown_shape_degrades() {
        let record = normalize(RawError::Other(json!([1, 2, 3])));
        assert_eq!(record.message, "unknown.error [1,2,3]");
    }

    #[test]
    fn test_raw_error_deserialization() {
        let raw: RawError = serde_json::from_str(
            r#"{"kind":"script","message":"boom","file":"a.js","line":1}"#,
        )
        .unwrap();
        assert_eq!(raw.source(), CaptureSource::Window);

        let raw: RawError =
            serde_json::from_str(r#"{"kind":"framework","args":["a",{"message":"b"}]}"#).unwrap();
        assert_eq!(normalize(raw).message, "framework.error a b");

        let raw: RawError = serde_json::from_str(r#"{"kind":"other","detail":"x"}"#).unwrap();
        assert_eq!(raw.source(), CaptureSource::Unknown);
        assert_eq!(normalize(raw).message, r#"unknown.error {"detail":"x"}"#);
    }

    #[test]
    fn test_plain_text_capture() {
        let record = normalize(RawError::Other(Value::String("stdin line".to_string())));
        assert_eq!(record.message, "unknown.error stdin line");
    }
}
