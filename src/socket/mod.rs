//! Unix-domain socket transport.
//!
//! Newline-delimited frames over a local socket. The listening side accepts
//! a bounded set of connections and re-emits their events tagged with a
//! connection id; the connecting side owns exactly one outbound connection
//! with the same event surface.

pub mod client;
pub mod codec;
pub mod connection;
pub mod listener;

use crate::models::envelope::Envelope;
use crate::AppError;

/// Event raised by a socket connection, listener, or client.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A connection was admitted.
    Connected {
        /// Connection identifier.
        connection_id: String,
    },
    /// One complete frame was received.
    Message {
        /// Connection identifier.
        connection_id: String,
        /// Decoded frame.
        envelope: Envelope,
    },
    /// A connection closed.
    Disconnected {
        /// Connection identifier.
        connection_id: String,
    },
    /// A connection- or listener-level failure.
    Error {
        /// Connection identifier, absent for listener-level errors.
        connection_id: Option<String>,
        /// Failure detail.
        error: AppError,
    },
    /// The listener stopped.
    Stopped,
}

pub use client::SocketClient;
pub use codec::{FrameCodec, FrameOptions};
pub use connection::ConnectionAdapter;
pub use listener::{ListenerConfig, SocketListener};
