//! Peer-introduction handshake.
//!
//! ```text
//! A ──initiate──▶ bridge ──request──▶ B
//! A ◀─(Connected)─ bridge ◀──accept── B
//!                 bridge ──established──▶ B
//! ```
//!
//! An `initiate` with no connected peer of the wanted type leaves A parked in
//! `Handshaking`. With a handshake timeout configured, a parked or unanswered
//! initiator moves to `Error` when the timer fires. A pending introduction is
//! dropped once either side disconnects or leaves the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::client::{
    ClientInfo, ClientType, ClientUpdate, ConnectionState, TransportKind,
};
use crate::models::message::{HandshakeMessage, HandshakePayload, HandshakePhase};
use crate::registry::StateRegistry;
use crate::router::Router;
use crate::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    initiator: String,
    peer: Option<String>,
}

/// Drives handshake state transitions, keyed by connection id.
#[derive(Debug)]
pub struct HandshakeCoordinator {
    registry: Arc<StateRegistry>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl HandshakeCoordinator {
    /// Create a coordinator. Timers stop when `cancel` fires.
    #[must_use]
    pub fn new(
        registry: Arc<StateRegistry>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            cancel,
        }
    }

    /// Number of introductions awaiting an `accept`.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drop every pending introduction involving `client_id`. Returns the
    /// number dropped.
    pub async fn forget_client(&self, client_id: &str) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, p| p.initiator != client_id && p.peer.as_deref() != Some(client_id));
        let dropped = before - pending.len();
        if dropped > 0 {
            debug!(%client_id, dropped, "pending handshakes dropped");
        }
        dropped
    }

    /// Drop pending introductions whose initiator is no longer a connected
    /// client. Returns the number dropped.
    pub async fn prune(&self) -> usize {
        let snapshot: Vec<(String, String)> = self
            .pending
            .lock()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), p.initiator.clone()))
            .collect();

        let mut orphaned = Vec::new();
        for (connection_id, initiator) in snapshot {
            let live = self
                .registry
                .get_client(&initiator)
                .await
                .is_some_and(|client| client.connected);
            if !live {
                orphaned.push((connection_id, initiator));
            }
        }

        let mut pending = self.pending.lock().await;
        let mut dropped = 0;
        for (connection_id, initiator) in orphaned {
            if pending
                .get(&connection_id)
                .is_some_and(|p| p.initiator == initiator)
            {
                pending.remove(&connection_id);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "orphaned handshakes pruned");
        }
        dropped
    }

    /// Apply one inbound handshake step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` for an `initiate` without a peer type
    /// or an `accept` that names no resolvable initiator or peer, and the
    /// router's error if a forwarded step cannot be delivered.
    pub async fn handle(&self, router: &Router, message: HandshakeMessage) -> Result<()> {
        match message.phase {
            HandshakePhase::Initiate => self.on_initiate(router, message).await,
            HandshakePhase::Accept => self.on_accept(router, message).await,
            HandshakePhase::Request | HandshakePhase::Established => {
                debug!(
                    phase = message.phase.as_str(),
                    source = %message.source_client_id,
                    "ignoring bridge-originated handshake phase"
                );
                Ok(())
            }
        }
    }

    async fn on_initiate(&self, router: &Router, message: HandshakeMessage) -> Result<()> {
        self.prune().await;
        let initiator = message.source_client_id;
        let HandshakePayload {
            capabilities,
            connection_id,
        } = message.payload;

        if self.registry.get_client(&initiator).await.is_none() {
            let client_type = capabilities.client_type.unwrap_or(ClientType::Other);
            self.registry
                .register_client(ClientInfo::new(&initiator, client_type, TransportKind::Socket))
                .await;
        }
        self.registry
            .update_client(
                &initiator,
                ClientUpdate {
                    state: Some(ConnectionState::Handshaking),
                    connected: Some(true),
                    capabilities: Some(capabilities.clone()),
                    ..ClientUpdate::default()
                },
            )
            .await;

        let Some(peer_type) = capabilities.peer_type else {
            return Err(AppError::Handshake(format!(
                "initiate from {initiator} names no peer type"
            )));
        };

        let peer = self
            .registry
            .get_connected_clients_by_type(peer_type)
            .await
            .into_iter()
            .find(|client| client.id != initiator)
            .map(|client| client.id);

        self.pending.lock().await.insert(
            connection_id.clone(),
            Pending {
                initiator: initiator.clone(),
                peer: peer.clone(),
            },
        );
        self.schedule_timeout(&connection_id, &initiator);

        let Some(peer) = peer else {
            info!(%initiator, %peer_type, %connection_id, "no peer available; handshake parked");
            return Ok(());
        };

        let request = HandshakeMessage::new(
            HandshakePhase::Request,
            initiator.clone(),
            Some(peer.clone()),
            HandshakePayload {
                capabilities,
                connection_id: connection_id.clone(),
            },
        );
        router.try_route(&request.into_message()).await?;
        info!(%initiator, %peer, %connection_id, "handshake request forwarded");
        Ok(())
    }

    async fn on_accept(&self, router: &Router, message: HandshakeMessage) -> Result<()> {
        let connection_id = message.payload.connection_id.clone();
        let pending = self.pending.lock().await.remove(&connection_id);

        let initiator = pending
            .as_ref()
            .map_or_else(|| message.source_client_id.clone(), |p| p.initiator.clone());
        let peer = pending
            .and_then(|p| p.peer)
            .or_else(|| {
                [
                    Some(message.source_client_id.clone()),
                    message.target_client_id.clone(),
                ]
                .into_iter()
                .flatten()
                .find(|id| *id != initiator)
            })
            .ok_or_else(|| {
                AppError::Handshake(format!("accept for {connection_id} names no peer"))
            })?;

        let connected = self
            .registry
            .update_client(
                &initiator,
                ClientUpdate {
                    state: Some(ConnectionState::Connected),
                    connected: Some(true),
                    ..ClientUpdate::default()
                },
            )
            .await
            .ok_or_else(|| {
                AppError::Handshake(format!("accept for {connection_id}: unknown initiator {initiator}"))
            })?;

        let established = HandshakeMessage::new(
            HandshakePhase::Established,
            initiator.clone(),
            Some(peer.clone()),
            HandshakePayload {
                capabilities: connected.capabilities.unwrap_or_default(),
                connection_id: connection_id.clone(),
            },
        );
        router.try_route(&established.into_message()).await?;
        info!(%initiator, %peer, %connection_id, "handshake established");
        Ok(())
    }

    fn schedule_timeout(&self, connection_id: &str, initiator: &str) {
        let Some(timeout) = self.timeout else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let pending = Arc::clone(&self.pending);
        let cancel = self.cancel.clone();
        let connection_id = connection_id.to_owned();
        let initiator = initiator.to_owned();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let expired = {
                        let mut pending = pending.lock().await;
                        let ours = pending
                            .get(&connection_id)
                            .is_some_and(|p| p.initiator == initiator);
                        if ours {
                            pending.remove(&connection_id);
                        }
                        ours
                    };
                    if !expired {
                        return;
                    }
                    let still_waiting = registry
                        .get_client(&initiator)
                        .await
                        .is_some_and(|c| c.state == ConnectionState::Handshaking);
                    if still_waiting {
                        warn!(%initiator, %connection_id, ?timeout, "handshake timed out");
                        registry
                            .update_client_state(&initiator, ConnectionState::Error)
                            .await;
                    }
                }
            }
        });
    }
}
