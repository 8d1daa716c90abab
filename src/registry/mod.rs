//! In-memory client and task registry.
//!
//! [`StateRegistry`] exclusively owns both maps behind one mutex, so every
//! mutation from connection handlers, tool calls, and the sweep task is
//! serialized. Persistence is a best-effort mirror of the client map: write
//! failures are logged and the in-memory state stays authoritative.

pub mod sweep;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::models::client::{
    ClientInfo, ClientType, ClientUpdate, ConnectionState, TransportKind,
};
use crate::models::task::{TaskState, TaskUpdate};
use crate::persistence::client_repo::ClientRepo;
use crate::persistence::db;
use crate::Result;

pub use sweep::SweepReport;

#[derive(Debug, Default)]
struct Maps {
    clients: HashMap<String, ClientInfo>,
    tasks: HashMap<String, TaskState>,
}

/// Client and task registry with an optional persistence mirror.
#[derive(Debug)]
pub struct StateRegistry {
    config: RegistryConfig,
    maps: Mutex<Maps>,
    repo: Option<ClientRepo>,
    sweep: std::sync::Mutex<Option<CancellationToken>>,
}

impl StateRegistry {
    /// Create a registry. The sweep task is not started.
    #[must_use]
    pub fn new(config: RegistryConfig, repo: Option<ClientRepo>) -> Arc<Self> {
        Arc::new(Self {
            config,
            maps: Mutex::new(Maps::default()),
            repo,
            sweep: std::sync::Mutex::new(None),
        })
    }

    /// Create a registry, opening the `SQLite` store when a persistence
    /// directory is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be opened.
    pub async fn open(config: RegistryConfig) -> Result<Arc<Self>> {
        let repo = match config.db_path() {
            Some(path) => {
                let pool = db::connect(&path).await?;
                Some(ClientRepo::new(Arc::new(pool)))
            }
            None => None,
        };
        Ok(Self::new(config, repo))
    }

    /// Registry settings.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Clients ──────────────────────────────────────────────────────────────

    /// Insert or replace a client, forcing it connected and refreshing
    /// `last_seen`.
    pub async fn register_client(&self, mut info: ClientInfo) -> ClientInfo {
        info.connected = true;
        info.last_seen = Utc::now();

        self.maps
            .lock()
            .await
            .clients
            .insert(info.id.clone(), info.clone());

        info!(client_id = %info.id, client_type = %info.client_type, "client registered");
        self.persist(&info).await;
        info
    }

    /// Snapshot of one client.
    pub async fn get_client(&self, id: &str) -> Option<ClientInfo> {
        self.maps.lock().await.clients.get(id).cloned()
    }

    /// Snapshot of every client.
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.maps.lock().await.clients.values().cloned().collect()
    }

    /// Refresh `last_seen`. No-op for unknown ids.
    pub async fn update_client_last_seen(&self, id: &str) {
        if let Some(client) = self.maps.lock().await.clients.get_mut(id) {
            client.last_seen = Utc::now();
        }
    }

    /// Mark a client disconnected. No-op for unknown ids.
    pub async fn disconnect_client(&self, id: &str) {
        let updated = {
            let mut maps = self.maps.lock().await;
            maps.clients.get_mut(id).map(|client| {
                client.connected = false;
                client.state = ConnectionState::Disconnected;
                client.last_seen = Utc::now();
                client.clone()
            })
        };

        if let Some(client) = updated {
            info!(client_id = %id, "client disconnected");
            self.persist(&client).await;
        }
    }

    /// Set the connection state. No-op for unknown ids.
    pub async fn update_client_state(&self, id: &str, state: ConnectionState) {
        let update = ClientUpdate {
            state: Some(state),
            ..ClientUpdate::default()
        };
        self.update_client(id, update).await;
    }

    /// Merge a partial update. Returns `None` for unknown ids.
    pub async fn update_client(&self, id: &str, update: ClientUpdate) -> Option<ClientInfo> {
        let updated = {
            let mut maps = self.maps.lock().await;
            let client = maps.clients.get_mut(id)?;
            if let Some(state) = update.state {
                client.state = state;
            }
            if let Some(connected) = update.connected {
                client.connected = connected;
            }
            if let Some(capabilities) = update.capabilities {
                client.capabilities = Some(capabilities);
            }
            if let Some(process_id) = update.process_id {
                client.process_id = Some(process_id);
            }
            if let Some(socket_path) = update.socket_path {
                client.socket_path = Some(socket_path);
            }
            client.last_seen = Utc::now();
            client.clone()
        };

        debug!(client_id = %id, state = ?updated.state, "client updated");
        self.persist(&updated).await;
        Some(updated)
    }

    /// Every connected client of `client_type`, ordered by id.
    pub async fn get_connected_clients_by_type(&self, client_type: ClientType) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .maps
            .lock()
            .await
            .clients
            .values()
            .filter(|client| client.client_type == client_type && client.connected)
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    /// Create a task with zero attempts, replacing any task with the same
    /// id. A zero `max_attempts` yields an already failed task.
    pub async fn create_task(&self, id: &str, client_id: &str, max_attempts: u32) -> TaskState {
        let task = TaskState::new(id, client_id, max_attempts);
        self.maps
            .lock()
            .await
            .tasks
            .insert(task.id.clone(), task.clone());
        debug!(task_id = %id, %client_id, max_attempts, "task created");
        task
    }

    /// Snapshot of one task.
    pub async fn get_task(&self, id: &str) -> Option<TaskState> {
        self.maps.lock().await.tasks.get(id).cloned()
    }

    /// Merge a partial update. Returns `None` for unknown ids.
    ///
    /// An exhausted task keeps its `Failed` status.
    pub async fn update_task(&self, id: &str, update: TaskUpdate) -> Option<TaskState> {
        let mut maps = self.maps.lock().await;
        let task = maps.tasks.get_mut(id)?;
        if !task.apply(update) {
            debug!(task_id = %id, "status change refused on exhausted task");
        }
        Some(task.clone())
    }

    /// Record one attempt. The task fails exactly when attempts reach
    /// `max_attempts`. Returns `None` for unknown ids.
    pub async fn increment_task_attempts(&self, id: &str) -> Option<TaskState> {
        let mut maps = self.maps.lock().await;
        let task = maps.tasks.get_mut(id)?;
        task.record_attempt();
        Some(task.clone())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Remove tasks idle beyond the TTL and disconnected clients stale beyond
    /// the TTL, as of `now`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let ttl = self.config.task_ttl();

        let (tasks_removed, removed_clients) = {
            let mut maps = self.maps.lock().await;

            let before = maps.tasks.len();
            maps.tasks.retain(|_, task| !task.is_expired(now, ttl));
            let tasks_removed = before - maps.tasks.len();

            let stale: Vec<String> = maps
                .clients
                .values()
                .filter(|client| !client.connected && client.is_stale(now, ttl))
                .map(|client| client.id.clone())
                .collect();
            for id in &stale {
                maps.clients.remove(id);
            }
            (tasks_removed, stale)
        };

        if let Some(repo) = &self.repo {
            for id in &removed_clients {
                if let Err(err) = repo.delete(id).await {
                    warn!(client_id = %id, %err, "failed to delete persisted client");
                }
            }
        }

        let report = SweepReport {
            tasks_removed,
            clients_removed: removed_clients.len(),
        };
        if report.tasks_removed > 0 || report.clients_removed > 0 {
            info!(
                tasks_removed = report.tasks_removed,
                clients_removed = report.clients_removed,
                "registry sweep removed expired entries"
            );
        }
        report
    }

    /// Load persisted clients into memory as stored.
    ///
    /// Clients already in memory are left untouched. Returns the number
    /// loaded; persistence failures are logged and yield zero.
    pub async fn load_persisted(&self) -> usize {
        let Some(repo) = &self.repo else {
            return 0;
        };
        let persisted = match repo.list().await {
            Ok(clients) => clients,
            Err(err) => {
                warn!(%err, "failed to load persisted clients");
                return 0;
            }
        };

        let mut maps = self.maps.lock().await;
        let mut loaded = 0;
        for client in persisted {
            if !maps.clients.contains_key(&client.id) {
                maps.clients.insert(client.id.clone(), client);
                loaded += 1;
            }
        }
        info!(loaded, "persisted clients loaded");
        loaded
    }

    /// Mark previously connected socket clients as not connected and
    /// `Discovering` so the transport can re-establish them.
    ///
    /// Call once at startup, after [`Self::load_persisted`]. Returns the
    /// number of clients marked.
    pub async fn recover_connections(&self) -> usize {
        let recovered: Vec<ClientInfo> = {
            let mut maps = self.maps.lock().await;
            maps.clients
                .values_mut()
                .filter(|client| client.connected && client.transport == TransportKind::Socket)
                .map(|client| {
                    client.connected = false;
                    client.state = ConnectionState::Discovering;
                    client.clone()
                })
                .collect()
        };

        for client in &recovered {
            self.persist(client).await;
        }
        info!(count = recovered.len(), "socket clients marked for rediscovery");
        recovered.len()
    }

    /// Start the periodic sweep. A no-op if already started.
    pub fn start_sweep(self: &Arc<Self>) {
        let mut slot = self.sweep.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        sweep::spawn_sweep_task(
            Arc::downgrade(self),
            self.config.cleanup_interval(),
            cancel.clone(),
        );
        *slot = Some(cancel);
    }

    /// Stop the periodic sweep. Only the first call has an effect.
    pub fn dispose(&self) {
        let token = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
            info!("registry sweep stopped");
        }
    }

    async fn persist(&self, client: &ClientInfo) {
        if let Some(repo) = &self.repo {
            if let Err(err) = repo.write(client).await {
                warn!(client_id = %client.id, %err, "failed to persist client");
            }
        }
    }
}

impl Drop for StateRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}
