//! Connecting-side transport over [`SocketClient`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};

use super::{forward_events, MessageTransport, TransportEvent, EVENT_CAPACITY};
use crate::events::EventHub;
use crate::models::envelope::{Envelope, FrameKind};
use crate::socket::{FrameOptions, SocketClient};
use crate::{AppError, Result};

/// Transport owning exactly one outbound socket connection.
#[derive(Debug)]
pub struct ClientTransport {
    socket_path: PathBuf,
    frame: FrameOptions,
    client: Mutex<Option<SocketClient>>,
    events: Arc<EventHub<TransportEvent>>,
}

impl ClientTransport {
    /// Create a disconnected transport targeting `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, frame: FrameOptions) -> Self {
        Self {
            socket_path: socket_path.into(),
            frame,
            client: Mutex::new(None),
            events: Arc::new(EventHub::new(EVENT_CAPACITY)),
        }
    }
}

impl MessageTransport for ClientTransport {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        if slot.as_ref().is_some_and(SocketClient::is_active) {
            return Ok(());
        }
        let client = SocketClient::connect(&self.socket_path, self.frame.clone()).await?;
        tokio::spawn(forward_events(
            client.subscribe_queue(),
            Arc::clone(&self.events),
            true,
        ));
        *slot = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client.disconnect().await;
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| AppError::Transport("transport is not connected".into()))?;
        client.send(&Envelope::tagged(FrameKind::Text, text)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.observe()
    }

    fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events.queue()
    }
}
