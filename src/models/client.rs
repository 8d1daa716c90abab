//! Client model and connection lifecycle.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppError;

/// Class of AI-tool client attached to the bridge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Claude desktop / CLI client.
    Claude,
    /// Cline editor extension.
    Cline,
    /// Any other MCP-speaking client.
    Other,
}

impl ClientType {
    /// Wire name of the client type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Cline => "cline",
            Self::Other => "other",
        }
    }
}

impl Display for ClientType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "cline" => Ok(Self::Cline),
            "other" => Ok(Self::Other),
            other => Err(AppError::Config(format!("unknown client type: {other}"))),
        }
    }
}

/// How a client reaches the bridge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Standard input/output streams.
    Stdio,
    /// Unix-domain socket.
    Socket,
}

/// Connection lifecycle state for a registered client.
///
/// `Disconnected` and `Error` are terminal until the client registers again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Seen but never contacted.
    Discovered,
    /// Recovered from persistence; re-establishment pending.
    Discovering,
    /// Process started or socket opening.
    Connecting,
    /// Peer-introduction handshake in flight.
    Handshaking,
    /// Fully connected.
    Connected,
    /// Connection closed.
    Disconnected,
    /// Connection failed.
    Error,
}

/// Capabilities advertised by a client, typically during a handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Self-declared client type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    /// Desired peer type for a handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_type: Option<ClientType>,
    /// Tool methods this client can serve.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Remaining free-form capability fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A client known to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Unique client identifier.
    pub id: String,
    /// Client class.
    #[serde(rename = "type")]
    pub client_type: ClientType,
    /// Transport the client is attached through.
    pub transport: TransportKind,
    /// Whether the client is currently reachable.
    pub connected: bool,
    /// Last liveness observation.
    pub last_seen: DateTime<Utc>,
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Advertised capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ClientCapabilities>,
    /// OS process id for auto-started clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Socket path for socket-attached clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

impl ClientInfo {
    /// Construct a client record in the `Discovered` state.
    #[must_use]
    pub fn new(id: impl Into<String>, client_type: ClientType, transport: TransportKind) -> Self {
        Self {
            id: id.into(),
            client_type,
            transport,
            connected: false,
            last_seen: Utc::now(),
            state: ConnectionState::Discovered,
            capabilities: None,
            process_id: None,
            socket_path: None,
        }
    }

    /// Builder-style setter for the connection state.
    #[must_use]
    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    /// Whether the client is stale relative to `now` given `ttl`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_seen > ttl
    }
}

/// Partial update applied by [`crate::registry::StateRegistry::update_client`].
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    /// New connection state.
    pub state: Option<ConnectionState>,
    /// New connected flag.
    pub connected: Option<bool>,
    /// Replacement capabilities.
    pub capabilities: Option<ClientCapabilities>,
    /// Process id of a supervised client.
    pub process_id: Option<u32>,
    /// Socket path of a socket client.
    pub socket_path: Option<String>,
}
