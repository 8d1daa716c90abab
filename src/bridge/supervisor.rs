//! Child-process supervision for auto-started clients.
//!
//! Startup commands are spawned with:
//! - `kill_on_drop(true)` so a dropped handle never leaks a process.
//! - The provisional client id in `BRIDGE_CLIENT_ID`.
//! - A spawn signal awaited under a timeout: process start, or the first
//!   stdout line when the startup entry asks for a ready line. On timeout the
//!   process is killed and `AppError::Spawn` is returned.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientStartup;
use crate::registry::StateRegistry;
use crate::{AppError, Result};

/// Environment variable carrying the provisional client id.
pub const CLIENT_ID_ENV: &str = "BRIDGE_CLIENT_ID";

/// Spawns, awaits, and reaps auto-started client processes.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    cancel: CancellationToken,
}

impl ProcessSupervisor {
    /// Create a supervisor with no children.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch `startup` for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the supervisor has shut down or the OS
    /// refuses to start the process.
    pub fn spawn(&self, client_id: &str, startup: &ClientStartup) -> Result<Child> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Spawn("supervisor is shut down".into()));
        }

        let stdout = if startup.wait_for_ready_line {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let child = Command::new(&startup.command)
            .args(&startup.args)
            .envs(&startup.env)
            .env(CLIENT_ID_ENV, client_id)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Spawn(format!("failed to spawn {}: {err}", startup.command))
            })?;

        info!(client_id, command = %startup.command, pid = child.id(), "client process spawned");
        Ok(child)
    }

    /// Wait for the spawn signal of `child`.
    ///
    /// Without a ready line the signal is the process having started and not
    /// already failed. With one, the first stdout line must arrive within
    /// `timeout`; the rest of stdout is drained to the debug log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` on timeout, early exit, or a read failure.
    /// The child is killed on timeout.
    pub async fn wait_ready(
        &self,
        client_id: &str,
        child: &mut Child,
        wait_for_ready_line: bool,
        timeout: Duration,
    ) -> Result<()> {
        if !wait_for_ready_line {
            return match child.try_wait() {
                Ok(Some(status)) if !status.success() => Err(AppError::Spawn(format!(
                    "client process exited during startup: {status}"
                ))),
                Ok(_) => Ok(()),
                Err(err) => Err(AppError::Spawn(format!(
                    "failed to poll client process: {err}"
                ))),
            };
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture client stdout".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        match tokio::time::timeout(timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                info!(client_id, ready_line = line.trim(), "client emitted ready signal");
            }
            Ok(Ok(None)) => {
                return Err(AppError::Spawn(
                    "client process exited before ready signal".into(),
                ));
            }
            Ok(Err(err)) => {
                return Err(AppError::Spawn(format!(
                    "failed to read client ready signal: {err}"
                )));
            }
            Err(_elapsed) => {
                child.kill().await.ok();
                return Err(AppError::Spawn(format!(
                    "startup timeout: client did not emit ready signal within {timeout:?}"
                )));
            }
        }

        let client_id = client_id.to_owned();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%client_id, line = line.trim(), "client stdout");
            }
        });
        Ok(())
    }

    /// Reap `child` in the background and mark its client disconnected when
    /// it exits.
    ///
    /// On [`Self::shutdown`] the monitor drops the child, which kills it.
    pub fn monitor(
        &self,
        client_id: String,
        mut child: Child,
        registry: Arc<StateRegistry>,
    ) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = child.wait() => {
                    match result {
                        Ok(status) => info!(%client_id, %status, "client process exited"),
                        Err(err) => warn!(%client_id, %err, "error waiting for client process"),
                    }
                    registry.disconnect_client(&client_id).await;
                }
                () = cancel.cancelled() => {
                    debug!(%client_id, "supervisor shutting down; killing client process");
                }
            }
        })
    }

    /// Stop every monitor and kill every supervised child.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
