//! MCP tool handlers.

pub mod call_tool;
pub mod discover_client;
pub mod util;
