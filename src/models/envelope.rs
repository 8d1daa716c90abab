//! Typed wire payload carried in one socket frame.
//!
//! Inbound frames are auto-detected in a fixed order: a UTF-8 string that
//! parses as JSON becomes [`FrameContent::Json`], any other UTF-8 string
//! becomes [`FrameContent::Text`], and non-UTF-8 bytes become
//! [`FrameContent::Binary`]. Serialization is total over all three tags.

use std::fmt::{Display, Formatter};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag describing the payload representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// JSON document.
    Json,
    /// Arbitrary text.
    Text,
    /// Raw bytes.
    Binary,
}

/// Payload of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameContent {
    /// Parsed JSON document.
    Json(serde_json::Value),
    /// Plain text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

/// A frame payload plus its creation timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Payload.
    pub content: FrameContent,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap already-typed content.
    #[must_use]
    pub fn new(content: FrameContent) -> Self {
        Self {
            content,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a JSON value.
    #[must_use]
    pub fn json(value: serde_json::Value) -> Self {
        Self::new(FrameContent::Json(value))
    }

    /// Wrap raw bytes without inspecting them.
    #[must_use]
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::new(FrameContent::Binary(bytes.into()))
    }

    /// Auto-detect a string: JSON if it parses, text otherwise.
    #[must_use]
    pub fn from_text(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => Self::json(value),
            Err(_) => Self::new(FrameContent::Text(raw.to_owned())),
        }
    }

    /// Build an envelope with an explicit tag, using `raw` as given.
    ///
    /// A `Json` tag on content that is not valid JSON keeps the content as a
    /// JSON string rather than failing.
    #[must_use]
    pub fn tagged(kind: FrameKind, raw: &str) -> Self {
        let content = match kind {
            FrameKind::Json => FrameContent::Json(
                serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.to_owned())),
            ),
            FrameKind::Text => FrameContent::Text(raw.to_owned()),
            FrameKind::Binary => FrameContent::Binary(Bytes::copy_from_slice(raw.as_bytes())),
        };
        Self::new(content)
    }

    /// Decode one received frame: UTF-8 input is auto-detected, anything
    /// else is binary.
    #[must_use]
    pub fn decode(frame: &[u8]) -> Self {
        match std::str::from_utf8(frame) {
            Ok(text) => Self::from_text(text),
            Err(_) => Self::binary(Bytes::copy_from_slice(frame)),
        }
    }

    /// Tag of the payload.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self.content {
            FrameContent::Json(_) => FrameKind::Json,
            FrameContent::Text(_) => FrameKind::Text,
            FrameContent::Binary(_) => FrameKind::Binary,
        }
    }

    /// JSON payload, if any.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match &self.content {
            FrameContent::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Serialize to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match &self.content {
            FrameContent::Binary(bytes) => bytes.clone(),
            _ => Bytes::from(self.to_string()),
        }
    }
}

impl Display for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.content {
            // A failed JSON serialization falls back to the value's text form.
            FrameContent::Json(value) => match serde_json::to_string(value) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "{value}"),
            },
            FrameContent::Text(text) => f.write_str(text),
            FrameContent::Binary(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<&str> for Envelope {
    fn from(raw: &str) -> Self {
        Self::from_text(raw)
    }
}

impl From<serde_json::Value> for Envelope {
    fn from(value: serde_json::Value) -> Self {
        Self::json(value)
    }
}

impl From<Bytes> for Envelope {
    fn from(bytes: Bytes) -> Self {
        Self::binary(bytes)
    }
}
