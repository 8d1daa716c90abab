//! Bridge messages exchanged between clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::ClientCapabilities;
use crate::{AppError, Result};

/// Message category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Work request.
    Request,
    /// Reply to a request.
    Response,
    /// Error report.
    Error,
    /// Peer-introduction handshake step.
    Handshake,
}

/// A routable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    pub id: String,
    /// Message category.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Method name used for rule lookup.
    pub method: String,
    /// Originating client.
    pub source_client_id: String,
    /// Explicit destination; bypasses routing rules when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_client_id: Option<String>,
    /// Opaque payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Construct a request message with a fresh id.
    #[must_use]
    pub fn request(
        method: impl Into<String>,
        source_client_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MessageKind::Request,
            method: method.into(),
            source_client_id: source_client_id.into(),
            target_client_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Builder-style setter for the explicit target.
    #[must_use]
    pub fn with_target(mut self, target_client_id: impl Into<String>) -> Self {
        self.target_client_id = Some(target_client_id.into());
        self
    }

    /// Builder-style setter for the message id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Parse a bridge message from a JSON value.
    ///
    /// Returns `None` when the value does not carry the message shape.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Step of the peer-introduction handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    /// Client A asks to be introduced to a peer.
    Initiate,
    /// Bridge asks peer B to accept A.
    Request,
    /// Peer B accepts.
    Accept,
    /// Bridge confirms the introduction.
    Established,
}

impl HandshakePhase {
    /// Wire method name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiate => "initiate",
            Self::Request => "request",
            Self::Accept => "accept",
            Self::Established => "established",
        }
    }

    fn parse(method: &str) -> Option<Self> {
        match method {
            "initiate" => Some(Self::Initiate),
            "request" => Some(Self::Request),
            "accept" => Some(Self::Accept),
            "established" => Some(Self::Established),
            _ => None,
        }
    }
}

/// Payload carried by every handshake step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    /// Capabilities of the sender (for `initiate`, the initiator).
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Correlates all steps of one introduction.
    pub connection_id: String,
}

/// A typed handshake message.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeMessage {
    /// Message id.
    pub id: String,
    /// Handshake step.
    pub phase: HandshakePhase,
    /// Sender.
    pub source_client_id: String,
    /// Recipient, when addressed.
    pub target_client_id: Option<String>,
    /// Step payload.
    pub payload: HandshakePayload,
}

impl HandshakeMessage {
    /// Construct a handshake step with a fresh message id.
    #[must_use]
    pub fn new(
        phase: HandshakePhase,
        source_client_id: impl Into<String>,
        target_client_id: Option<String>,
        payload: HandshakePayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phase,
            source_client_id: source_client_id.into(),
            target_client_id,
            payload,
        }
    }

    /// Interpret a generic message as a handshake step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the message is not a handshake, the
    /// method is not a known phase, or the payload is malformed.
    pub fn try_from_message(message: &Message) -> Result<Self> {
        if message.kind != MessageKind::Handshake {
            return Err(AppError::Handshake(format!(
                "message {} is not a handshake",
                message.id
            )));
        }
        let phase = HandshakePhase::parse(&message.method).ok_or_else(|| {
            AppError::Handshake(format!("unknown handshake method: {}", message.method))
        })?;
        let payload: HandshakePayload = serde_json::from_value(message.payload.clone())
            .map_err(|err| AppError::Handshake(format!("invalid handshake payload: {err}")))?;

        Ok(Self {
            id: message.id.clone(),
            phase,
            source_client_id: message.source_client_id.clone(),
            target_client_id: message.target_client_id.clone(),
            payload,
        })
    }

    /// Convert back into a generic message.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            kind: MessageKind::Handshake,
            method: self.phase.as_str().to_owned(),
            source_client_id: self.source_client_id,
            target_client_id: self.target_client_id,
            payload: serde_json::to_value(&self.payload).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }
}
