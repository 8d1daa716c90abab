//! `discover_client` MCP tool handler.
//!
//! Returns a connected client of the requested type, auto-starting one from
//! the configured startup command when asked. Failures are reported as
//! `{found: false, error}` rather than protocol errors.

use std::time::Duration;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;
use tracing::{info_span, Instrument};

use super::util::{json_result, parse_args};
use crate::mcp::handler::BridgeServer;
use crate::models::client::ClientType;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverInput {
    client_type: ClientType,
    #[serde(default)]
    auto_start: bool,
    /// Spawn-signal window in milliseconds.
    #[serde(default)]
    timeout: Option<u64>,
}

/// Handle the `discover_client` tool call.
///
/// # Errors
///
/// Returns `invalid_params` for malformed arguments.
pub async fn handle(
    context: ToolCallContext<'_, BridgeServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let bridge = std::sync::Arc::clone(context.service.bridge());
    let input: DiscoverInput = parse_args("discover_client", context.arguments)?;

    let span = info_span!(
        "discover_client",
        client_type = %input.client_type,
        auto_start = input.auto_start,
    );

    async move {
        let discovery = bridge
            .discover_client(
                input.client_type,
                input.auto_start,
                input.timeout.map(Duration::from_millis),
            )
            .await;
        json_result(&discovery)
    }
    .instrument(span)
    .await
}
