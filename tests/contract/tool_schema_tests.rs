//! Contract tests for the MCP tool surface: names, input schemas, and
//! result shapes.

use serde_json::{json, Value};

use mcp_bridge::bridge::{Discovery, ToolCallAck};
use mcp_bridge::mcp::handler::{BridgeServer, DISCOVER_CLIENT, TOOLS_CALL};
use mcp_bridge::models::client::{ClientInfo, ClientType, TransportKind};
use mcp_bridge::models::task::TaskStatus;

fn schema_of(name: &str) -> Value {
    let tool = BridgeServer::all_tools()
        .into_iter()
        .find(|tool| tool.name == name)
        .unwrap_or_else(|| panic!("tool {name} not advertised"));
    Value::Object((*tool.input_schema).clone())
}

// ── discover_client ──────────────────────────────────────

#[test]
fn discover_client_requires_only_client_type() {
    let schema = schema_of(DISCOVER_CLIENT);
    assert_eq!(schema["required"], json!(["clientType"]));
    assert_eq!(schema["properties"]["clientType"]["enum"], json!(["claude", "cline"]));
    assert_eq!(schema["properties"]["autoStart"]["type"], "boolean");
    assert_eq!(schema["properties"]["timeout"]["type"], "number");
}

#[test]
fn discovery_found_omits_error() {
    let client = ClientInfo::new("c1", ClientType::Claude, TransportKind::Socket);
    let found = Discovery {
        found: true,
        client: Some(client),
        error: None,
    };
    let value = serde_json::to_value(&found).unwrap();
    assert_eq!(value["found"], true);
    assert_eq!(value["client"]["id"], "c1");
    assert_eq!(value["client"]["type"], "claude");
    assert!(value.get("error").is_none());
}

#[test]
fn discovery_not_found_is_structured() {
    let missing = Discovery {
        found: false,
        client: None,
        error: Some("No connected client of type cline".into()),
    };
    let value = serde_json::to_value(&missing).unwrap();
    assert_eq!(
        value,
        json!({ "found": false, "error": "No connected client of type cline" })
    );
}

// ── tools/call ───────────────────────────────────────────

#[test]
fn tools_call_requires_only_method() {
    let schema = schema_of(TOOLS_CALL);
    assert_eq!(schema["required"], json!(["method"]));
    assert_eq!(schema["properties"]["arguments"]["type"], "object");
    assert_eq!(schema["properties"]["targetType"]["enum"], json!(["claude", "cline"]));
}

#[test]
fn tool_call_ack_is_camel_case() {
    let ack = ToolCallAck {
        task_id: "t1".into(),
        message_id: "t1".into(),
        target_client_id: Some("c1".into()),
        status: TaskStatus::Processing,
    };
    assert_eq!(
        serde_json::to_value(&ack).unwrap(),
        json!({
            "taskId": "t1",
            "messageId": "t1",
            "targetClientId": "c1",
            "status": "processing"
        })
    );
}
