//! Contract tests for the JSON shapes peers exchange over the socket.

use serde_json::json;

use mcp_bridge::models::client::{ClientCapabilities, ClientType};
use mcp_bridge::models::envelope::{Envelope, FrameKind};
use mcp_bridge::models::message::{
    HandshakeMessage, HandshakePayload, HandshakePhase, Message, MessageKind,
};

#[test]
fn request_message_wire_shape() {
    let message = Message::request("tools/optimize_code", "bridge", json!({"file": "a.rs"}))
        .with_id("m1")
        .with_target("c1");
    let value = serde_json::to_value(&message).unwrap();

    assert_eq!(value["id"], "m1");
    assert_eq!(value["type"], "request");
    assert_eq!(value["method"], "tools/optimize_code");
    assert_eq!(value["sourceClientId"], "bridge");
    assert_eq!(value["targetClientId"], "c1");
    assert_eq!(value["payload"]["file"], "a.rs");
    assert!(value["timestamp"].is_string());
}

#[test]
fn untargeted_message_omits_target() {
    let value = serde_json::to_value(Message::request("m", "a", json!(null))).unwrap();
    assert!(value.get("targetClientId").is_none());
}

#[test]
fn peer_handshake_frame_parses() {
    let frame = json!({
        "id": "h1",
        "type": "handshake",
        "method": "initiate",
        "sourceClientId": "a",
        "payload": {
            "capabilities": { "clientType": "claude", "peerType": "cline", "version": 2 },
            "connectionId": "conn-1"
        },
        "timestamp": "2026-01-01T00:00:00Z"
    });

    let message = Message::from_value(&frame).unwrap();
    assert_eq!(message.kind, MessageKind::Handshake);

    let handshake = HandshakeMessage::try_from_message(&message).unwrap();
    assert_eq!(handshake.phase, HandshakePhase::Initiate);
    assert_eq!(handshake.payload.connection_id, "conn-1");
    assert_eq!(handshake.payload.capabilities.peer_type, Some(ClientType::Cline));
    assert_eq!(handshake.payload.capabilities.extra["version"], 2);
}

#[test]
fn handshake_step_serializes_phase_as_method() {
    let message = HandshakeMessage::new(
        HandshakePhase::Established,
        "bridge",
        Some("b".into()),
        HandshakePayload {
            capabilities: ClientCapabilities {
                client_type: Some(ClientType::Claude),
                ..ClientCapabilities::default()
            },
            connection_id: "conn-1".into(),
        },
    )
    .into_message();
    let value = serde_json::to_value(&message).unwrap();

    assert_eq!(value["type"], "handshake");
    assert_eq!(value["method"], "established");
    assert_eq!(
        value["payload"],
        json!({ "capabilities": { "clientType": "claude" }, "connectionId": "conn-1" })
    );
}

#[test]
fn json_rpc_frames_are_not_bridge_messages() {
    let rpc = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
    assert!(Message::from_value(&rpc).is_none());
}

#[test]
fn envelope_detection_order() {
    assert_eq!(Envelope::from(r#"{"a":1}"#).kind(), FrameKind::Json);
    assert_eq!(Envelope::from("plain words").kind(), FrameKind::Text);
    assert_eq!(Envelope::decode(&[0xff, 0xfe]).kind(), FrameKind::Binary);
    assert_eq!(Envelope::tagged(FrameKind::Text, "42").kind(), FrameKind::Text);
}
