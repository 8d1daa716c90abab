//! Transport setup for the MCP server.
//!
//! Stdio mode wires [`BridgeServer`] to stdin/stdout. Socket mode serves it
//! over an in-process pipe that the orchestrator pumps to and from the socket
//! peers.

use rmcp::service::ServiceExt;
use rmcp::transport::io::stdio;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handler::BridgeServer;
use crate::{AppError, Result};

/// Serve MCP over stdio until the peer disconnects or `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Mcp` if the transport fails to initialize or the
/// service ends abnormally.
pub async fn serve_stdio(server: BridgeServer, ct: CancellationToken) -> Result<()> {
    info!("starting stdio MCP transport");
    let service = server
        .serve_with_ct(stdio(), ct)
        .await
        .map_err(|err| AppError::Mcp(format!("stdio transport failed: {err}")))?;

    service
        .waiting()
        .await
        .map_err(|err| AppError::Mcp(format!("stdio service error: {err}")))?;

    info!("stdio MCP transport shut down");
    Ok(())
}

/// Serve MCP over one end of an in-process pipe until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Mcp` if the initialize exchange fails or the service
/// ends abnormally.
pub async fn serve_transport(
    server: BridgeServer,
    io: (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>),
    ct: CancellationToken,
) -> Result<()> {
    info!("starting socket MCP transport");
    let service = server
        .serve_with_ct(io, ct)
        .await
        .map_err(|err| AppError::Mcp(format!("socket transport failed: {err}")))?;

    service
        .waiting()
        .await
        .map_err(|err| AppError::Mcp(format!("socket service error: {err}")))?;

    info!("socket MCP transport shut down");
    Ok(())
}
