//! Periodic expiry sweep for the state registry.

use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::StateRegistry;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks removed.
    pub tasks_removed: usize,
    /// Clients removed.
    pub clients_removed: usize,
}

/// Spawn the sweep task.
///
/// Ticks every `period`; the first tick is one full period after start. The
/// task exits when `cancel` fires or the registry is dropped.
pub(crate) fn spawn_sweep_task(
    registry: Weak<StateRegistry>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("registry sweep task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let Some(registry) = registry.upgrade() else {
                        debug!("registry dropped; sweep exiting");
                        break;
                    };
                    registry.sweep_expired(Utc::now()).await;
                }
            }
        }
    })
}
