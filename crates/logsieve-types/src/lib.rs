//! Shared types for logsieve
//!
//! This crate contains the log entry model consumed by the filter crate and
//! the stream loop in the binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Message Event Types
// ============================================================================

/// Error produced when a message type cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageEventError {
    #[error("unknown message type tag {0}")]
    UnknownRawTag(u8),

    #[error("unknown message type '{0}'")]
    UnknownName(String),
}

/// Unified logging message type.
///
/// Discriminants are the raw tags the logging system itself uses, so they are
/// stable across releases and safe to persist.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", rename_all = "lowercase")]
#[repr(u8)]
pub enum MessageEvent {
    #[default]
    Default = 0,
    Info = 1,
    Debug = 2,
    Error = 16,
    Fault = 17,
}

impl MessageEvent {
    /// Every message type, in raw tag order
    pub const ALL: [MessageEvent; 5] = [
        Self::Default,
        Self::Info,
        Self::Debug,
        Self::Error,
        Self::Fault,
    ];

    /// Stable numeric tag
    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Short display string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Error => "error",
            Self::Fault => "fault",
        }
    }
}

impl TryFrom<u8> for MessageEvent {
    type Error = MessageEventError;

    fn try_from(raw: u8) -> Result<Self, MessageEventError> {
        match raw {
            0 => Ok(MessageEvent::Default),
            1 => Ok(MessageEvent::Info),
            2 => Ok(MessageEvent::Debug),
            16 => Ok(MessageEvent::Error),
            17 => Ok(MessageEvent::Fault),
            other => Err(MessageEventError::UnknownRawTag(other)),
        }
    }
}

impl FromStr for MessageEvent {
    type Err = MessageEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "notice" => Ok(Self::Default),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "error" => Ok(Self::Error),
            "fault" => Ok(Self::Fault),
            _ => Err(MessageEventError::UnknownName(s.to_string())),
        }
    }
}

impl TryFrom<String> for MessageEvent {
    type Error = MessageEventError;

    fn try_from(s: String) -> Result<Self, MessageEventError> {
        s.parse()
    }
}

impl fmt::Display for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stream Entries
// ============================================================================

/// A single entry from the log stream.
///
/// Deserialization accepts the camelCase keys emitted by
/// `log stream --style ndjson`. That format has no process name key, so a
/// missing `process` is taken from the image path's file name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEntry")]
pub struct StreamEntry {
    /// Message text
    pub message: String,

    /// Process name
    pub process: String,

    /// Process ID
    pub process_id: i32,

    /// Subsystem (reverse-DNS, may be empty)
    pub subsystem: String,

    /// Category within the subsystem (may be empty)
    pub category: String,

    /// Message type
    pub message_type: MessageEvent,

    /// Path of the executable that emitted the entry
    pub process_image_path: String,

    /// When the entry was emitted
    #[serde(serialize_with = "timestamp::serialize")]
    pub timestamp: DateTime<Utc>,
}

impl StreamEntry {
    /// Create a new entry with minimal fields
    pub fn new(process: String, process_id: i32, message: String) -> Self {
        Self {
            message,
            process,
            process_id,
            subsystem: String::new(),
            category: String::new(),
            message_type: MessageEvent::Default,
            process_image_path: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Process name, falling back to the image path's file name
    pub fn process_name(&self) -> &str {
        if !self.process.is_empty() {
            return &self.process;
        }
        image_file_name(&self.process_image_path)
    }
}

fn image_file_name(image_path: &str) -> &str {
    image_path.rsplit('/').next().unwrap_or(image_path)
}

/// On-the-wire shape of a [`StreamEntry`]
#[derive(Deserialize)]
struct WireEntry {
    #[serde(alias = "eventMessage", default)]
    message: String,

    #[serde(default)]
    process: String,

    #[serde(alias = "processID", default)]
    process_id: i32,

    #[serde(default)]
    subsystem: String,

    #[serde(default)]
    category: String,

    #[serde(alias = "messageType", default)]
    message_type: MessageEvent,

    #[serde(alias = "processImagePath", default)]
    process_image_path: String,

    #[serde(deserialize_with = "timestamp::deserialize", default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl From<WireEntry> for StreamEntry {
    fn from(wire: WireEntry) -> Self {
        let process = if wire.process.is_empty() {
            image_file_name(&wire.process_image_path).to_string()
        } else {
            wire.process
        };

        Self {
            message: wire.message,
            process,
            process_id: wire.process_id,
            subsystem: wire.subsystem,
            category: wire.category,
            message_type: wire.message_type,
            process_image_path: wire.process_image_path,
            timestamp: wire.timestamp,
        }
    }
}

/// Timestamps are written as RFC 3339 and read as either RFC 3339 or the
/// `2022-12-09 12:00:00.123456-0800` form used by the `log` tool.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    const LOG_TOOL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%z";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .or_else(|_| DateTime::parse_from_str(&raw, LOG_TOOL_FORMAT))
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| de::Error::custom(format!("invalid timestamp '{raw}': {e}")))
    }
}
