//! Connecting side of the socket transport.

use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::codec::FrameOptions;
use super::connection::ConnectionAdapter;
use super::SocketEvent;
use crate::events::EventHub;
use crate::models::envelope::Envelope;
use crate::{AppError, Result};

const EVENT_CAPACITY: usize = 256;

/// Connection id used for the single outbound connection.
pub const OUTBOUND_CONNECTION_ID: &str = "outbound";

/// One outbound connection to a bridge socket.
#[derive(Debug)]
pub struct SocketClient {
    connection: Arc<ConnectionAdapter>,
    events: Arc<EventHub<SocketEvent>>,
}

impl SocketClient {
    /// Connect to the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection is refused.
    pub async fn connect(path: &Path, options: FrameOptions) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|err| {
            AppError::Transport(format!("failed to connect to {}: {err}", path.display()))
        })?;

        let events = Arc::new(EventHub::new(EVENT_CAPACITY));
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
        let connection = ConnectionAdapter::spawn(OUTBOUND_CONNECTION_ID, stream, options, conn_tx);

        let forward = Arc::clone(&events);
        tokio::spawn(async move {
            while let Some(event) = conn_rx.recv().await {
                forward.emit(event);
            }
            debug!("outbound connection event stream ended");
        });

        info!(path = %path.display(), "connected to bridge socket");
        Ok(Self { connection, events })
    }

    /// Observe connection events. A receiver that falls behind skips
    /// events.
    ///
    /// Subscribe before expecting traffic; earlier events are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.observe()
    }

    /// Receive every later connection event, in order, without loss.
    #[must_use]
    pub fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<SocketEvent> {
        self.events.queue()
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection.is_active()
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection is closed or the
    /// write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.connection.send(envelope).await
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }
}
