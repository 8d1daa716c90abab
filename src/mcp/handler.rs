//! MCP server handler and tool router.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ErrorCode, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tracing::info_span;

use crate::bridge::BridgeOrchestrator;

/// Name of the discovery tool.
pub const DISCOVER_CLIENT: &str = "discover_client";
/// Name of the dispatch tool.
pub const TOOLS_CALL: &str = "tools/call";

/// MCP server exposing the bridge's two tools.
#[derive(Debug, Clone)]
pub struct BridgeServer {
    bridge: Arc<BridgeOrchestrator>,
}

impl BridgeServer {
    /// Create a server over `bridge`.
    #[must_use]
    pub fn new(bridge: Arc<BridgeOrchestrator>) -> Self {
        Self { bridge }
    }

    /// The orchestrator behind this server.
    #[must_use]
    pub fn bridge(&self) -> &Arc<BridgeOrchestrator> {
        &self.bridge
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();

        for tool in Self::all_tools() {
            if tool.name == DISCOVER_CLIENT {
                router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(crate::mcp::tools::discover_client::handle(context))
                }));
            } else {
                router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(crate::mcp::tools::call_tool::handle(context))
                }));
            }
        }

        router
    }

    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    /// Tool definitions advertised by `tools/list`.
    #[must_use]
    pub fn all_tools() -> Vec<Tool> {
        vec![
            Tool::new(
                DISCOVER_CLIENT,
                "Find a connected client of the given type, optionally starting one \
                 from its configured startup command.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "clientType": { "type": "string", "enum": ["claude", "cline"] },
                        "autoStart": { "type": "boolean", "default": false },
                        "timeout": { "type": "number", "description": "Startup window in milliseconds" }
                    },
                    "required": ["clientType"]
                })),
            ),
            Tool::new(
                TOOLS_CALL,
                "Dispatch a method to a connected client and acknowledge with a task id.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "method": { "type": "string" },
                        "arguments": { "type": "object" },
                        "targetType": { "type": "string", "enum": ["claude", "cline"] }
                    },
                    "required": ["method"]
                })),
            ),
        ]
    }
}

impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            instructions: Some(
                "Bridge between MCP clients: discover peers and dispatch tool calls.".into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let _span = info_span!("call_tool", tool = %request.name).entered();
        let known = request.name == DISCOVER_CLIENT || request.name == TOOLS_CALL;

        async move {
            if !known {
                return Err(rmcp::ErrorData::new(
                    ErrorCode::METHOD_NOT_FOUND,
                    format!("unknown tool: {}", request.name),
                    None,
                ));
            }
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::all_tools())))
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, rmcp::ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListResourcesResult::with_all_items(Vec::new())))
    }
}
