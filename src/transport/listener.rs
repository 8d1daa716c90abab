//! Listening-side transport over [`SocketListener`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{forward_events, MessageTransport, TransportEvent, EVENT_CAPACITY};
use crate::events::EventHub;
use crate::models::envelope::{Envelope, FrameKind};
use crate::socket::{ListenerConfig, SocketListener};
use crate::Result;

/// Transport that serves every peer connected to a socket listener.
///
/// Clones share the listener and subscriber channel.
#[derive(Debug, Clone)]
pub struct ListenerTransport {
    listener: SocketListener,
    events: Arc<EventHub<TransportEvent>>,
}

impl ListenerTransport {
    /// Create a transport around a new, stopped listener.
    #[must_use]
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            listener: SocketListener::new(config),
            events: Arc::new(EventHub::new(EVENT_CAPACITY)),
        }
    }

    /// Underlying listener.
    #[must_use]
    pub fn listener(&self) -> &SocketListener {
        &self.listener
    }
}

impl MessageTransport for ListenerTransport {
    async fn connect(&self) -> Result<()> {
        if self.listener.is_running().await {
            return Ok(());
        }
        let source = self.listener.subscribe_queue();
        self.listener.start().await?;
        tokio::spawn(forward_events(source, Arc::clone(&self.events), false));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.listener.stop().await;
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        let delivered = self.listener.broadcast(&Envelope::tagged(FrameKind::Text, text)).await;
        debug!(delivered, "broadcast outbound message");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.observe()
    }

    fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events.queue()
    }
}
