//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Bridge error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Socket bind, connect, or write failure.
    Transport(String),
    /// Frame decoding failure, including receive-buffer overflow.
    Frame(String),
    /// No eligible target could be resolved for a message.
    Routing(String),
    /// Task bookkeeping failure.
    Task(String),
    /// Peer-introduction handshake failure.
    Handshake(String),
    /// Child process spawn or startup failure.
    Spawn(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// MCP protocol or tool dispatch failure.
    Mcp(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Frame(msg) => write!(f, "frame: {msg}"),
            Self::Routing(msg) => write!(f, "routing: {msg}"),
            Self::Task(msg) => write!(f, "task: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Mcp(msg) => write!(f, "mcp: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
