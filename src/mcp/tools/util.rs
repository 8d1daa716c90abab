//! Shared helpers for MCP tool handlers.

use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

use crate::AppError;

/// Wrap a serializable value as a successful text result.
///
/// # Errors
///
/// Returns an internal error if `value` cannot be serialized.
pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, rmcp::ErrorData> {
    let text = serde_json::to_string(value).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to encode tool result: {err}"), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Map a bridge error onto the MCP error space.
#[must_use]
pub fn to_error_data(err: &AppError) -> rmcp::ErrorData {
    match err {
        AppError::Config(_) | AppError::Handshake(_) => {
            rmcp::ErrorData::invalid_params(err.to_string(), None)
        }
        _ => rmcp::ErrorData::internal_error(err.to_string(), None),
    }
}

/// Deserialize tool arguments, reporting failures as invalid params.
///
/// # Errors
///
/// Returns `invalid_params` when the arguments do not match `T`.
pub fn parse_args<T: serde::de::DeserializeOwned>(
    tool: &str,
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<T, rmcp::ErrorData> {
    serde_json::from_value(serde_json::Value::Object(arguments.unwrap_or_default())).map_err(
        |err| rmcp::ErrorData::invalid_params(format!("invalid {tool} parameters: {err}"), None),
    )
}
