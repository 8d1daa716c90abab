//! Bridge orchestrator.
//!
//! Composes the registry, router, handshake coordinator, and process
//! supervisor, and owns the outer MCP transport. It is the only component the
//! MCP tool handlers talk to.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handshake::HandshakeCoordinator;
use super::supervisor::ProcessSupervisor;
use crate::config::{BridgeConfig, TransportMode};
use crate::mcp::handler::BridgeServer;
use crate::mcp::transport::{serve_stdio, serve_transport};
use crate::models::client::{
    ClientInfo, ClientType, ClientUpdate, ConnectionState, TransportKind,
};
use crate::models::message::{HandshakeMessage, Message, MessageKind};
use crate::models::task::{TaskStatus, TaskUpdate};
use crate::registry::StateRegistry;
use crate::router::{MessageSink, Router};
use crate::socket::{ListenerConfig, SocketEvent};
use crate::transport::{ListenerTransport, MessageTransport};
use crate::{AppError, Result};

/// Source id stamped on messages the bridge originates.
pub const BRIDGE_CLIENT_ID: &str = "bridge";

/// Capacity of the in-process pipe between the socket and the MCP server.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Outcome of `discover_client`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    /// Whether a connected client was found or started.
    pub found: bool,
    /// The client, when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    /// Why no client was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Discovery {
    fn found(client: ClientInfo) -> Self {
        Self {
            found: true,
            client: Some(client),
            error: None,
        }
    }

    fn not_found(error: impl Into<String>) -> Self {
        Self {
            found: false,
            client: None,
            error: Some(error.into()),
        }
    }
}

/// Immediate acknowledgement of a dispatched tool call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallAck {
    /// Task tracking the call.
    pub task_id: String,
    /// Id of the routed message.
    pub message_id: String,
    /// Client the message was delivered to.
    pub target_client_id: Option<String>,
    /// Task status after dispatch.
    pub status: TaskStatus,
}

/// Router sink feeding the outbound delivery queue.
#[derive(Debug)]
struct ChannelSink(mpsc::UnboundedSender<Message>);

impl MessageSink for ChannelSink {
    fn deliver(&self, message: Message) -> Result<()> {
        self.0
            .send(message)
            .map_err(|_| AppError::Transport("outbound delivery queue closed".into()))
    }
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    transport: Option<ListenerTransport>,
}

/// Composition root of the bridge.
#[derive(Debug)]
pub struct BridgeOrchestrator {
    config: BridgeConfig,
    registry: Arc<StateRegistry>,
    router: Router,
    handshakes: HandshakeCoordinator,
    supervisor: ProcessSupervisor,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    initialized: AtomicBool,
    running: Mutex<Option<Running>>,
    shutdown: CancellationToken,
}

impl BridgeOrchestrator {
    /// Create an orchestrator whose router deliveries go out over the
    /// transport chosen at [`Self::start`].
    #[must_use]
    pub fn new(config: BridgeConfig, registry: Arc<StateRegistry>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::build(config, registry, Arc::new(ChannelSink(tx)), Some(rx))
    }

    /// Create an orchestrator delivering routed messages into `sink`.
    #[must_use]
    pub fn with_sink(
        config: BridgeConfig,
        registry: Arc<StateRegistry>,
        sink: Arc<dyn MessageSink>,
    ) -> Arc<Self> {
        Self::build(config, registry, sink, None)
    }

    fn build(
        config: BridgeConfig,
        registry: Arc<StateRegistry>,
        sink: Arc<dyn MessageSink>,
        outbound: Option<mpsc::UnboundedReceiver<Message>>,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let router = Router::new(config.routing.clone(), Arc::clone(&registry), sink);
        let handshakes = HandshakeCoordinator::new(
            Arc::clone(&registry),
            config.handshake_timeout(),
            shutdown.clone(),
        );
        Arc::new(Self {
            config,
            registry,
            router,
            handshakes,
            supervisor: ProcessSupervisor::new(),
            outbound: std::sync::Mutex::new(outbound),
            initialized: AtomicBool::new(false),
            running: Mutex::new(None),
            shutdown,
        })
    }

    /// Bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<StateRegistry> {
        &self.registry
    }

    /// Message router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handshake coordinator.
    #[must_use]
    pub fn handshakes(&self) -> &HandshakeCoordinator {
        &self.handshakes
    }

    /// Resolves once the bridge has stopped or the stdio peer went away.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Load persisted clients, mark socket clients for rediscovery, and start
    /// the expiry sweep. Runs once; later calls are no-ops.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let loaded = self.registry.load_persisted().await;
        let recovered = self.registry.recover_connections().await;
        self.registry.start_sweep();
        info!(loaded, recovered, "bridge initialized");
    }

    /// Start serving MCP over the configured transport. A no-op while
    /// running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the socket listener cannot bind.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("bridge already running");
            return Ok(());
        }

        let cancel = self.shutdown.child_token();
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let server = BridgeServer::new(Arc::clone(self));

        let transport = match self.config.transport {
            TransportMode::Stdio => {
                if let Some(rx) = outbound {
                    tokio::spawn(discard_deliveries(rx, cancel.clone()));
                }
                let ct = cancel.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_stdio(server, ct).await {
                        error!(%err, "stdio MCP server failed");
                    }
                    shutdown.cancel();
                });
                None
            }
            TransportMode::Socket => Some(self.start_socket(server, outbound, &cancel).await?),
        };

        *running = Some(Running { cancel, transport });
        info!(transport = ?self.config.transport, "bridge started");
        Ok(())
    }

    async fn start_socket(
        self: &Arc<Self>,
        server: BridgeServer,
        outbound: Option<mpsc::UnboundedReceiver<Message>>,
        cancel: &CancellationToken,
    ) -> Result<ListenerTransport> {
        let transport = ListenerTransport::new(ListenerConfig::from(&self.config));
        let events = transport.listener().subscribe_queue();
        transport.connect().await?;

        let (bridge_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
        let ct = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_transport(server, tokio::io::split(server_io), ct).await {
                error!(%err, "socket MCP server failed");
            }
        });

        let (pipe_read, pipe_write) = tokio::io::split(bridge_io);
        tokio::spawn(Arc::clone(self).dispatch_inbound(events, pipe_write, cancel.clone()));
        tokio::spawn(pump_mcp_output(pipe_read, transport.clone(), cancel.clone()));
        if let Some(rx) = outbound {
            tokio::spawn(pump_deliveries(rx, transport.clone(), cancel.clone()));
        }
        Ok(transport)
    }

    /// Stop the transport, kill supervised children, and stop the sweep.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Some(transport) = running.transport {
                if let Err(err) = transport.disconnect().await {
                    warn!(%err, "failed to close transport");
                }
            }
        }
        self.supervisor.shutdown();
        self.registry.dispose();
        self.shutdown.cancel();
        info!("bridge stopped");
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Dispatch `method` to a client and acknowledge immediately.
    ///
    /// With `target_type`, the first connected client of that type is the
    /// explicit target; otherwise the routing rules decide. Responses are not
    /// correlated back and failed tasks are not retried.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Routing` when no target can be resolved; the task
    /// is marked failed first.
    pub async fn call_tool(
        &self,
        method: &str,
        arguments: serde_json::Value,
        target_type: Option<ClientType>,
    ) -> Result<ToolCallAck> {
        let message_id = Uuid::new_v4().to_string();
        self.registry
            .create_task(&message_id, BRIDGE_CLIENT_ID, self.config.task_max_attempts)
            .await;

        let message = Message::request(method, BRIDGE_CLIENT_ID, arguments).with_id(&message_id);
        let routed = match target_type {
            Some(client_type) => self.router.route_to_type(&message, client_type).await,
            None => self.router.try_route(&message).await,
        };

        match routed {
            Ok(routed) => {
                let status = self
                    .registry
                    .update_task(&message_id, TaskUpdate::status(TaskStatus::Processing))
                    .await
                    .map_or(TaskStatus::Processing, |task| task.status);
                info!(task_id = %message_id, %method, ?status, "tool call dispatched");
                Ok(ToolCallAck {
                    task_id: message_id.clone(),
                    message_id,
                    target_client_id: routed.target_client_id,
                    status,
                })
            }
            Err(err) => {
                self.registry
                    .update_task(&message_id, TaskUpdate::failed(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    /// Find a connected client of `client_type`, optionally auto-starting
    /// one.
    ///
    /// `timeout` bounds the spawn signal and defaults to the startup entry's
    /// own timeout. Start failures are reported in the outcome, not as
    /// errors.
    pub async fn discover_client(
        &self,
        client_type: ClientType,
        auto_start: bool,
        timeout: Option<Duration>,
    ) -> Discovery {
        if let Some(client) = self
            .registry
            .get_connected_clients_by_type(client_type)
            .await
            .into_iter()
            .next()
        {
            return Discovery::found(client);
        }

        if !auto_start {
            return Discovery::not_found(format!("No connected client of type {client_type}"));
        }
        let Some(startup) = self.config.startup_for(client_type).cloned() else {
            return Discovery::not_found(format!(
                "No startup configuration for client type {client_type}"
            ));
        };

        let client_id = format!("{client_type}-{}", Uuid::new_v4());
        let mut child = match self.supervisor.spawn(&client_id, &startup) {
            Ok(child) => child,
            Err(err) => return Discovery::not_found(err.to_string()),
        };

        self.registry
            .register_client(
                ClientInfo::new(&client_id, client_type, TransportKind::Stdio)
                    .with_state(ConnectionState::Connecting),
            )
            .await;
        self.registry
            .update_client(
                &client_id,
                ClientUpdate {
                    connected: Some(false),
                    process_id: child.id(),
                    ..ClientUpdate::default()
                },
            )
            .await;

        let timeout =
            timeout.unwrap_or_else(|| Duration::from_secs(startup.startup_timeout_seconds));
        if let Err(err) = self
            .supervisor
            .wait_ready(&client_id, &mut child, startup.wait_for_ready_line, timeout)
            .await
        {
            warn!(%client_id, %err, "auto-started client failed to come up");
            drop(child);
            self.registry.disconnect_client(&client_id).await;
            return Discovery::not_found(err.to_string());
        }

        let client = self
            .registry
            .update_client(
                &client_id,
                ClientUpdate {
                    state: Some(ConnectionState::Connected),
                    connected: Some(true),
                    ..ClientUpdate::default()
                },
            )
            .await;
        self.supervisor
            .monitor(client_id.clone(), child, Arc::clone(&self.registry));

        match client {
            Some(client) => Discovery::found(client),
            None => Discovery::not_found(format!("client {client_id} vanished during startup")),
        }
    }

    /// Apply one bridge message received from a peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` for a malformed or unresolvable
    /// handshake step and `AppError::Routing` when a request cannot be
    /// routed.
    pub async fn handle_peer_message(&self, message: Message) -> Result<()> {
        self.registry
            .update_client_last_seen(&message.source_client_id)
            .await;

        match message.kind {
            MessageKind::Handshake => {
                let handshake = HandshakeMessage::try_from_message(&message)?;
                self.handshakes.handle(&self.router, handshake).await
            }
            MessageKind::Request => self.router.try_route(&message).await.map(|_| ()),
            MessageKind::Response | MessageKind::Error => {
                // TODO: correlate responses with their task and re-route failures up to max_attempts.
                debug!(
                    message_id = %message.id,
                    kind = ?message.kind,
                    "response correlation not implemented; dropping"
                );
                Ok(())
            }
        }
    }

    /// Mark `client_id` disconnected and drop its pending introductions.
    pub async fn disconnect_peer(&self, client_id: &str) {
        self.registry.disconnect_client(client_id).await;
        self.handshakes.forget_client(client_id).await;
    }

    async fn dispatch_inbound(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
        mut pipe: WriteHalf<DuplexStream>,
        cancel: CancellationToken,
    ) {
        let mut peers = PeerIndex::default();
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };

            match event {
                SocketEvent::Message {
                    connection_id,
                    envelope,
                } => {
                    let text = envelope.to_string();
                    if let Some(message) = parse_bridge_message(&text) {
                        peers.record(&connection_id, &message.source_client_id);
                        if let Err(err) = self.handle_peer_message(message).await {
                            warn!(%connection_id, %err, "peer message rejected");
                        }
                    } else if let Err(err) = write_line(&mut pipe, &text).await {
                        error!(%err, "MCP pipe closed; inbound dispatch stopping");
                        break;
                    }
                }
                SocketEvent::Disconnected { connection_id } => {
                    for client_id in peers.release(&connection_id) {
                        info!(%connection_id, %client_id, "peer socket closed");
                        self.disconnect_peer(&client_id).await;
                    }
                }
                SocketEvent::Error {
                    connection_id,
                    error,
                } => warn!(
                    connection_id = connection_id.as_deref().unwrap_or_default(),
                    %error,
                    "transport error"
                ),
                SocketEvent::Stopped => break,
                SocketEvent::Connected { .. } => {}
            }
        }
        debug!("inbound dispatch stopped");
    }
}

/// Client ids introduced over each live socket connection.
#[derive(Debug, Default)]
struct PeerIndex {
    by_connection: HashMap<String, HashSet<String>>,
}

impl PeerIndex {
    fn record(&mut self, connection_id: &str, client_id: &str) {
        if client_id == BRIDGE_CLIENT_ID {
            return;
        }
        self.by_connection
            .entry(connection_id.to_owned())
            .or_default()
            .insert(client_id.to_owned());
    }

    /// Forget `connection_id`, returning the clients no other live
    /// connection still speaks for.
    fn release(&mut self, connection_id: &str) -> Vec<String> {
        let Some(clients) = self.by_connection.remove(connection_id) else {
            return Vec::new();
        };
        let mut orphaned: Vec<String> = clients
            .into_iter()
            .filter(|id| !self.by_connection.values().any(|other| other.contains(id)))
            .collect();
        orphaned.sort();
        orphaned
    }
}

/// Parse `text` as a bridge message, if it is one.
fn parse_bridge_message(text: &str) -> Option<Message> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    Message::from_value(&value)
}

async fn write_line(pipe: &mut WriteHalf<DuplexStream>, text: &str) -> std::io::Result<()> {
    pipe.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        pipe.write_all(b"\n").await?;
    }
    pipe.flush().await
}

/// Forward MCP server output to the socket peers, one frame per line.
async fn pump_mcp_output(
    pipe: ReadHalf<DuplexStream>,
    transport: ListenerTransport,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(pipe, LinesCodec::new());
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next() => line,
        };
        match line {
            Some(Ok(line)) => {
                if let Err(err) = transport.send(&line).await {
                    warn!(%err, "failed to forward MCP output");
                }
            }
            Some(Err(err)) => {
                error!(%err, "MCP output pipe failed");
                break;
            }
            None => break,
        }
    }
    debug!("MCP output pump stopped");
}

/// Write routed messages to the socket peers as JSON frames.
async fn pump_deliveries(
    mut rx: mpsc::UnboundedReceiver<Message>,
    transport: ListenerTransport,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else { break };
        match serde_json::to_string(&message) {
            Ok(json) => {
                if let Err(err) = transport.send(&json).await {
                    warn!(message_id = %message.id, %err, "failed to deliver routed message");
                }
            }
            Err(err) => warn!(message_id = %message.id, %err, "failed to encode routed message"),
        }
    }
    debug!("delivery pump stopped");
}

/// Stdio has no peer channel for routed messages.
async fn discard_deliveries(mut rx: mpsc::UnboundedReceiver<Message>, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else { break };
        warn!(
            message_id = %message.id,
            target = message.target_client_id.as_deref().unwrap_or_default(),
            "stdio transport cannot deliver routed messages; dropped"
        );
    }
}
