//! String-message transports consumed by the protocol layer.
//!
//! Hides the socket listener and client behind one
//! connect / disconnect / send / subscribe surface.
//!
//! The listening side has no per-client addressing: [`ListenerTransport::send`]
//! broadcasts to every connected peer.

pub mod client;
pub mod listener;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::events::EventHub;
use crate::socket::SocketEvent;
use crate::Result;

pub use client::ClientTransport;
pub use listener::ListenerTransport;

const EVENT_CAPACITY: usize = 256;

/// Event delivered to transport subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound message.
    Message(String),
    /// The transport closed.
    Closed,
    /// A non-fatal transport failure.
    Error(String),
}

/// Bidirectional string-message transport.
pub trait MessageTransport: Send + Sync + 'static {
    /// Open the transport. Idempotent.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Close the transport. Idempotent.
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Send one message.
    fn send(&self, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Observe inbound messages and lifecycle events. A receiver that falls
    /// behind skips events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Receive every later inbound message and lifecycle event, in order,
    /// without loss.
    fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

/// Translate a socket event into a transport event, if it has one.
fn translate(event: SocketEvent) -> Option<TransportEvent> {
    match event {
        SocketEvent::Message { envelope, .. } => Some(TransportEvent::Message(envelope.to_string())),
        SocketEvent::Error { connection_id, error } => Some(TransportEvent::Error(
            connection_id.map_or_else(|| error.to_string(), |id| format!("{id}: {error}")),
        )),
        SocketEvent::Stopped => Some(TransportEvent::Closed),
        SocketEvent::Connected { .. } | SocketEvent::Disconnected { .. } => None,
    }
}

/// Forward socket events to transport subscribers until the source closes.
async fn forward_events(
    mut source: mpsc::UnboundedReceiver<SocketEvent>,
    sink: Arc<EventHub<TransportEvent>>,
    close_on_disconnect: bool,
) {
    while let Some(event) = source.recv().await {
        if close_on_disconnect && matches!(event, SocketEvent::Disconnected { .. }) {
            sink.emit(TransportEvent::Closed);
            break;
        }
        let stopped = matches!(event, SocketEvent::Stopped);
        if let Some(event) = translate(event) {
            sink.emit(event);
        }
        if stopped {
            break;
        }
    }
}
