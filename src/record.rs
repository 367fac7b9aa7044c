//! Error records and their wire representation.
//!
//! [`ErrorRecord`] is the canonical captured failure that flows through the
//! pipeline. [`Batch`] is one drain step's worth of persisted records and
//! [`ServerRecord`] is the shape the collector expects.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp format shared by the local store and the collector.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Message used when a capture carried nothing usable.
pub const FALLBACK_MESSAGE: &str = "error";

/// Current local time truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// One captured failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Store-assigned id, present only once persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Script or URL the failure came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,

    /// Source-tagged message, never empty
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Free-form diagnostic context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,

    /// When the failure happened; filled with the submission time if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<NaiveDateTime>,
}

impl ErrorRecord {
    /// Create a record carrying only a message.
    ///
    /// An empty or whitespace-only message is replaced so the record never
    /// reaches the store or the collector without one.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            message
        };

        Self {
            id: None,
            file: None,
            line: None,
            column: None,
            message,
            stack: None,
            remark: None,
            tenant_code: None,
            user_code: None,
            occurred_at: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, line: Option<i64>, column: Option<i64>) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: NaiveDateTime) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Prepend `prefix` to the remark, keeping whatever was there.
    pub fn prefix_remark(&mut self, prefix: &str) {
        let existing = self.remark.take().unwrap_or_default();
        self.remark = Some(format!("{}{}", prefix, existing));
    }

    /// The diagnostic JSON object sent as `error_object`.
    ///
    /// Only fields that carry information are included: absent values and
    /// zero line/column numbers are left out.
    pub fn error_object(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut object = serde_json::Map::new();

        if let Some(file) = self.file.as_deref().filter(|f| !f.is_empty()) {
            object.insert("file".to_string(), file.into());
        }
        if let Some(line) = self.line.filter(|l| *l != 0) {
            object.insert("line".to_string(), line.into());
        }
        if let Some(column) = self.column.filter(|c| *c != 0) {
            object.insert("column".to_string(), column.into());
        }
        if !self.message.is_empty() {
            object.insert("message".to_string(), self.message.clone().into());
        }
        if let Some(stack) = self.stack.as_deref().filter(|s| !s.is_empty()) {
            object.insert("stack".to_string(), stack.into());
        }
        if let Some(remark) = self.remark.as_deref().filter(|r| !r.is_empty()) {
            object.insert("remark".to_string(), remark.into());
        }

        object
    }
}

/// Persisted records selected for one drain attempt.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Client-side id used to correlate log lines for this attempt
    pub batch_id: Uuid,

    /// Records in insertion order
    pub records: Vec<ErrorRecord>,
}

impl Batch {
    pub fn new(records: Vec<ErrorRecord>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            records,
        }
    }

    /// Store ids of every record in the batch.
    pub fn ids(&self) -> Vec<i64> {
        self.records.iter().filter_map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A record in the collector's upload format.
///
/// `device_info` and `error_object` are JSON documents encoded as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub tenant_code: Option<String>,
    pub user_account: Option<String>,
    pub occurred_date: String,
    pub device_info: String,
    pub error_object: String,
}

impl ServerRecord {
    /// Shape `record` for upload, stamping it with the given device description.
    pub fn from_record(
        record: &ErrorRecord,
        device_info: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let occurred = record.occurred_at.unwrap_or_else(now_local);

        Self {
            tenant_code: record.tenant_code.clone(),
            user_account: record.user_code.clone(),
            occurred_date: occurred.format(TIME_FORMAT).to_string(),
            device_info: serde_json::Value::Object(device_info.clone()).to_string(),
            error_object: serde_json::Value::Object(record.error_object()).to_string(),
        }
    }
}
