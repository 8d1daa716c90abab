//! `tools/call` MCP tool handler.
//!
//! Dispatches a method to a connected client and acknowledges immediately
//! with the tracking task id.

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde::Deserialize;
use tracing::{info_span, Instrument};

use super::util::{json_result, parse_args, to_error_data};
use crate::mcp::handler::BridgeServer;
use crate::models::client::ClientType;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallInput {
    method: String,
    #[serde(default)]
    arguments: serde_json::Value,
    #[serde(default)]
    target_type: Option<ClientType>,
}

/// Handle the `tools/call` tool call.
///
/// # Errors
///
/// Returns `invalid_params` for malformed arguments and an internal error
/// when the call cannot be routed.
pub async fn handle(
    context: ToolCallContext<'_, BridgeServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let bridge = std::sync::Arc::clone(context.service.bridge());
    let input: CallInput = parse_args("tools/call", context.arguments)?;

    let span = info_span!("tools_call", method = %input.method);

    async move {
        let ack = bridge
            .call_tool(&input.method, input.arguments, input.target_type)
            .await
            .map_err(|err| to_error_data(&err))?;
        json_result(&ack)
    }
    .instrument(span)
    .await
}
