//! Unix-domain socket listener.
//!
//! Binds a socket path, admits up to `max_connections` peers, and wraps each
//! admitted stream in a [`ConnectionAdapter`]. Connection events are
//! re-published tagged with the connection id, to lagging observers and to
//! lossless queue subscribers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::codec::FrameOptions;
use super::connection::ConnectionAdapter;
use super::SocketEvent;
use crate::config::BridgeConfig;
use crate::events::EventHub;
use crate::models::envelope::Envelope;
use crate::{AppError, Result};

/// Message written to a peer refused for lack of capacity.
pub const CAPACITY_MESSAGE: &str = "ERROR: server at capacity, connection refused\n";

const EVENT_CAPACITY: usize = 256;

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Socket path to bind.
    pub socket_path: PathBuf,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Remove a stale socket file on start and the socket file on stop.
    pub auto_clean: bool,
    /// Framing for admitted connections.
    pub frame: FrameOptions,
}

impl ListenerConfig {
    /// Listener settings with defaults for everything except the path.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_connections: 50,
            auto_clean: true,
            frame: FrameOptions::default(),
        }
    }
}

impl From<&BridgeConfig> for ListenerConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            max_connections: config.max_connections,
            auto_clean: config.auto_clean_socket,
            frame: FrameOptions::new(&config.frame_delimiter, config.frame_capacity),
        }
    }
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Shared {
    config: ListenerConfig,
    connections: Mutex<HashMap<String, Arc<ConnectionAdapter>>>,
    events: EventHub<SocketEvent>,
    running: Mutex<Option<Running>>,
}

/// Unix-domain socket listener managing a bounded set of connections.
#[derive(Debug, Clone)]
pub struct SocketListener {
    shared: Arc<Shared>,
}

impl SocketListener {
    /// Create a stopped listener.
    #[must_use]
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connections: Mutex::new(HashMap::new()),
                events: EventHub::new(EVENT_CAPACITY),
                running: Mutex::new(None),
            }),
        }
    }

    /// Observe listener events. A receiver that falls behind skips events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events.observe()
    }

    /// Receive every later listener event, in order, without loss.
    #[must_use]
    pub fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<SocketEvent> {
        self.shared.events.queue()
    }

    /// Bound socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.shared.config.socket_path
    }

    /// Whether the listener is accepting connections.
    pub async fn is_running(&self) -> bool {
        self.shared.running.lock().await.is_some()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.shared.connections.lock().await.len()
    }

    /// Bind and start accepting. A second call while running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the socket directory cannot be
    /// created, a stale file cannot be removed, or binding fails. The same
    /// error is broadcast as a [`SocketEvent::Error`].
    pub async fn start(&self) -> Result<()> {
        let mut running = self.shared.running.lock().await;
        if running.is_some() {
            debug!(path = %self.socket_path().display(), "listener already running");
            return Ok(());
        }

        let listener = match self.shared.bind() {
            Ok(listener) => listener,
            Err(err) => {
                self.shared.emit(SocketEvent::Error {
                    connection_id: None,
                    error: err.clone(),
                });
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let span = info_span!("socket_listener", path = %self.socket_path().display());
        tokio::spawn(
            Arc::clone(&self.shared)
                .accept_loop(listener, conn_tx, cancel.clone())
                .instrument(span.clone()),
        );
        tokio::spawn(
            Arc::clone(&self.shared)
                .pump_events(conn_rx)
                .instrument(span),
        );

        *running = Some(Running { cancel });
        info!(path = %self.socket_path().display(), "socket listener started");
        Ok(())
    }

    /// Disconnect every connection, close the listener, and remove the
    /// socket file when auto-clean is set. A no-op when not running.
    pub async fn stop(&self) {
        self.shared.stop().await;
    }

    /// Send `envelope` to every live connection.
    ///
    /// Per-connection failures are broadcast as errors and skipped.
    /// Returns the number of connections that accepted the frame.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let targets: Vec<Arc<ConnectionAdapter>> =
            self.shared.connections.lock().await.values().cloned().collect();

        let mut delivered = 0;
        for conn in targets {
            match conn.send(envelope).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(connection_id = %conn.id(), %err, "broadcast send failed");
                    self.shared.emit(SocketEvent::Error {
                        connection_id: Some(conn.id().to_owned()),
                        error: err,
                    });
                }
            }
        }
        delivered
    }

    /// Send `envelope` to one connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such connection exists, or the
    /// connection's send error.
    pub async fn send_to_client(&self, connection_id: &str, envelope: &Envelope) -> Result<()> {
        let conn = self
            .shared
            .connections
            .lock()
            .await
            .get(connection_id)
            .cloned();

        let Some(conn) = conn else {
            let err = AppError::NotFound(format!("client {connection_id} not found"));
            self.shared.emit(SocketEvent::Error {
                connection_id: Some(connection_id.to_owned()),
                error: err.clone(),
            });
            return Err(err);
        };

        conn.send(envelope).await
    }
}

impl Shared {
    fn emit(&self, event: SocketEvent) {
        self.events.emit(event);
    }

    fn bind(&self) -> Result<UnixListener> {
        let path = &self.config.socket_path;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    AppError::Transport(format!(
                        "failed to create socket directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }
        }

        if self.config.auto_clean && path.exists() {
            std::fs::remove_file(path).map_err(|err| {
                AppError::Transport(format!(
                    "failed to remove stale socket {}: {err}",
                    path.display()
                ))
            })?;
            debug!(path = %path.display(), "removed stale socket file");
        }

        UnixListener::bind(path).map_err(|err| {
            AppError::Transport(format!("failed to bind {}: {err}", path.display()))
        })
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: UnixListener,
        conn_tx: mpsc::UnboundedSender<SocketEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("accept loop cancelled");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.admit(stream, &conn_tx).await,
                    Err(err) => {
                        error!(%err, "listener failed; stopping");
                        self.emit(SocketEvent::Error {
                            connection_id: None,
                            error: AppError::Transport(format!("accept failed: {err}")),
                        });
                        self.stop().await;
                        break;
                    }
                }
            }
        }
    }

    async fn admit(&self, mut stream: UnixStream, conn_tx: &mpsc::UnboundedSender<SocketEvent>) {
        let mut connections = self.connections.lock().await;
        if connections.len() >= self.config.max_connections {
            drop(connections);
            warn!(
                max_connections = self.config.max_connections,
                "rejecting connection: at capacity"
            );
            if let Err(err) = stream.write_all(CAPACITY_MESSAGE.as_bytes()).await {
                debug!(%err, "failed to notify refused peer");
            }
            let _ = stream.shutdown().await;
            return;
        }

        let connection_id = Uuid::new_v4().to_string();
        let adapter = ConnectionAdapter::spawn(
            connection_id.clone(),
            stream,
            self.config.frame.clone(),
            conn_tx.clone(),
        );
        connections.insert(connection_id.clone(), adapter);
        drop(connections);

        info!(%connection_id, "client connected");
        self.emit(SocketEvent::Connected { connection_id });
    }

    /// Forward adapter events to subscribers, forgetting closed connections.
    ///
    /// Runs until every adapter and the accept loop have dropped their senders.
    async fn pump_events(self: Arc<Self>, mut conn_rx: mpsc::UnboundedReceiver<SocketEvent>) {
        while let Some(event) = conn_rx.recv().await {
            if let SocketEvent::Disconnected { connection_id } = &event {
                self.connections.lock().await.remove(connection_id);
                info!(%connection_id, "client disconnected");
            }
            self.emit(event);
        }
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();

        let connections: Vec<Arc<ConnectionAdapter>> = self
            .connections
            .lock()
            .await
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in connections {
            conn.disconnect().await;
        }

        let path = &self.config.socket_path;
        if self.config.auto_clean && path.exists() {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), %err, "failed to remove socket file");
            }
        }

        info!(path = %path.display(), "socket listener stopped");
        self.emit(SocketEvent::Stopped);
    }
}
