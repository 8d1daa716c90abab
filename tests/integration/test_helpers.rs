//! Shared fixtures for integration tests.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use mcp_bridge::socket::SocketListener;

/// How long a test waits for any single expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fresh temp directory and a socket path inside it.
pub fn socket_in_tempdir() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bridge.sock");
    (dir, path)
}

/// Receive events until one matches `pick`, returning its projection.
pub async fn wait_for<T, U>(
    rx: &mut broadcast::Receiver<T>,
    mut pick: impl FnMut(&T) -> Option<U>,
) -> U
where
    T: Clone,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(&event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until `listener` holds exactly `count` connections.
pub async fn wait_for_connections(listener: &SocketListener, count: usize) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while listener.connection_count().await != count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for connections");
}
