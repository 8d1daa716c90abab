//! Bridge configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::client::ClientType;
use crate::{AppError, Result};

/// Outer protocol transport.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Serve MCP over stdin/stdout.
    Stdio,
    /// Serve MCP over a Unix-domain socket.
    #[default]
    Socket,
}

/// One per-method routing rule.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoutingRule {
    /// Preferred client type for the method.
    pub target_type: ClientType,
    /// Rule priority; higher wins when rules are compared.
    #[serde(default)]
    pub priority: i32,
}

/// Routing rules consulted by the router.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct RoutingConfig {
    /// Fallback type when no rule matches.
    #[serde(default)]
    pub default_target_type: Option<ClientType>,
    /// Method name → rule.
    #[serde(default)]
    pub rules: HashMap<String, RoutingRule>,
}

/// State registry timing and persistence settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Period of the expiry sweep.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Age after which idle tasks and stale disconnected clients are dropped.
    #[serde(default = "default_task_ttl")]
    pub task_ttl_seconds: u64,
    /// Directory holding the client store; `None` disables persistence.
    #[serde(default)]
    pub persistence_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: default_cleanup_interval(),
            task_ttl_seconds: default_task_ttl(),
            persistence_dir: None,
        }
    }
}

impl RegistryConfig {
    /// Sweep period.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Path of the `SQLite` client store, if persistence is enabled.
    #[must_use]
    pub fn db_path(&self) -> Option<PathBuf> {
        self.persistence_dir
            .as_ref()
            .map(|dir| dir.join("bridge.db"))
    }

    /// Expiry threshold.
    #[must_use]
    pub fn task_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.task_ttl_seconds).unwrap_or(i64::MAX))
    }
}

/// How to auto-start a client of one type.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientStartup {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Default window for the spawn signal.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    /// Treat the first stdout line as the spawn signal instead of process start.
    #[serde(default)]
    pub wait_for_ready_line: bool,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/mcp-bridge.sock")
}

fn default_max_connections() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> String {
    "\n".into()
}

fn default_frame_capacity() -> usize {
    64 * 1024
}

fn default_task_max_attempts() -> u32 {
    3
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_task_ttl() -> u64 {
    3600
}

fn default_startup_timeout() -> u64 {
    30
}

/// Global bridge configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Outer protocol transport.
    #[serde(default)]
    pub transport: TransportMode,
    /// Unix-domain socket path.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Maximum concurrent socket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Remove stale socket files on start and the socket file on stop.
    #[serde(default = "default_true")]
    pub auto_clean_socket: bool,
    /// Frame delimiter.
    #[serde(default = "default_delimiter")]
    pub frame_delimiter: String,
    /// Receive-buffer capacity per connection, in bytes.
    #[serde(default = "default_frame_capacity")]
    pub frame_capacity: usize,
    /// Attempt bound for dispatched tasks.
    #[serde(default = "default_task_max_attempts")]
    pub task_max_attempts: u32,
    /// Handshake timeout; 0 leaves unanswered handshakes parked.
    #[serde(default)]
    pub handshake_timeout_seconds: u64,
    /// Registry timing and persistence.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Routing rules.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Auto-start commands keyed by client type name.
    #[serde(default)]
    pub clients: HashMap<String, ClientStartup>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            socket_path: default_socket_path(),
            max_connections: default_max_connections(),
            auto_clean_socket: true,
            frame_delimiter: default_delimiter(),
            frame_capacity: default_frame_capacity(),
            task_max_attempts: default_task_max_attempts(),
            handshake_timeout_seconds: 0,
            registry: RegistryConfig::default(),
            routing: RoutingConfig::default(),
            clients: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake timeout, if enabled.
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.handshake_timeout_seconds))
    }

    /// Auto-start entry for `client_type`, if one is configured.
    #[must_use]
    pub fn startup_for(&self, client_type: ClientType) -> Option<&ClientStartup> {
        self.clients.get(client_type.as_str())
    }

    /// Path of the `SQLite` client store, if persistence is enabled.
    #[must_use]
    pub fn db_path(&self) -> Option<PathBuf> {
        self.registry.db_path()
    }

    /// Validate invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(AppError::Config(
                "max_connections must be greater than zero".into(),
            ));
        }
        if self.frame_capacity == 0 {
            return Err(AppError::Config(
                "frame_capacity must be greater than zero".into(),
            ));
        }
        if self.frame_delimiter.is_empty() {
            return Err(AppError::Config("frame_delimiter must not be empty".into()));
        }
        if self.task_max_attempts == 0 {
            return Err(AppError::Config(
                "task_max_attempts must be greater than zero".into(),
            ));
        }
        if self.registry.cleanup_interval_seconds == 0 {
            return Err(AppError::Config(
                "registry.cleanup_interval_seconds must be greater than zero".into(),
            ));
        }
        for (client_type, startup) in &self.clients {
            client_type.parse::<ClientType>()?;
            if startup.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "clients.{client_type}.command must not be empty"
                )));
            }
        }
        Ok(())
    }
}
