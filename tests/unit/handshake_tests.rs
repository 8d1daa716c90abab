//! Handshake state machine tests driven through the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use mcp_bridge::bridge::BridgeOrchestrator;
use mcp_bridge::models::client::{ClientCapabilities, ClientType, ConnectionState};
use mcp_bridge::models::message::{
    HandshakeMessage, HandshakePayload, HandshakePhase, MessageKind,
};
use mcp_bridge::{AppError, BridgeConfig};

use super::test_helpers::{connect, registry, RecordingSink};

fn bridge_with(config: BridgeConfig) -> (Arc<BridgeOrchestrator>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let bridge = BridgeOrchestrator::with_sink(config, registry(), sink.clone());
    (bridge, sink)
}

fn initiate(source: &str, peer_type: Option<ClientType>, connection_id: &str) -> HandshakeMessage {
    HandshakeMessage::new(
        HandshakePhase::Initiate,
        source,
        None,
        HandshakePayload {
            capabilities: ClientCapabilities {
                client_type: Some(ClientType::Claude),
                peer_type,
                tools: vec!["optimize_code".into()],
                ..ClientCapabilities::default()
            },
            connection_id: connection_id.into(),
        },
    )
}

fn accept(source: &str, target: Option<&str>, connection_id: &str) -> HandshakeMessage {
    HandshakeMessage::new(
        HandshakePhase::Accept,
        source,
        target.map(str::to_owned),
        HandshakePayload {
            capabilities: ClientCapabilities::default(),
            connection_id: connection_id.into(),
        },
    )
}

#[tokio::test]
async fn initiate_forwards_request_to_peer() {
    let (bridge, sink) = bridge_with(BridgeConfig::default());
    connect(bridge.registry(), "b", ClientType::Cline).await;

    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();

    let a = bridge.registry().get_client("a").await.expect("initiator registered");
    assert_eq!(a.state, ConnectionState::Handshaking);
    assert_eq!(a.client_type, ClientType::Claude);
    assert_eq!(
        a.capabilities.unwrap().tools,
        vec!["optimize_code".to_owned()]
    );

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    let request = HandshakeMessage::try_from_message(&delivered[0]).unwrap();
    assert_eq!(request.phase, HandshakePhase::Request);
    assert_eq!(request.source_client_id, "a");
    assert_eq!(request.target_client_id.as_deref(), Some("b"));
    assert_eq!(request.payload.connection_id, "conn-1");
    assert_eq!(bridge.handshakes().pending_count().await, 1);
}

#[tokio::test]
async fn initiate_without_peer_parks_initiator() {
    let (bridge, sink) = bridge_with(BridgeConfig::default());

    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();

    assert!(sink.delivered().is_empty());
    assert_eq!(
        bridge.registry().get_client("a").await.unwrap().state,
        ConnectionState::Handshaking
    );
}

#[tokio::test]
async fn accept_connects_initiator_and_confirms_to_peer() {
    let (bridge, sink) = bridge_with(BridgeConfig::default());
    connect(bridge.registry(), "b", ClientType::Cline).await;

    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();
    bridge
        .handle_peer_message(accept("b", None, "conn-1").into_message())
        .await
        .unwrap();

    let a = bridge.registry().get_client("a").await.unwrap();
    assert_eq!(a.state, ConnectionState::Connected);
    assert!(a.connected);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].kind, MessageKind::Handshake);
    let established = HandshakeMessage::try_from_message(&delivered[1]).unwrap();
    assert_eq!(established.phase, HandshakePhase::Established);
    assert_eq!(established.target_client_id.as_deref(), Some("b"));
    assert_eq!(established.payload.connection_id, "conn-1");
    assert_eq!(bridge.handshakes().pending_count().await, 0);
}

#[tokio::test]
async fn accept_without_pending_uses_declared_source_as_initiator() {
    let (bridge, sink) = bridge_with(BridgeConfig::default());
    connect(bridge.registry(), "a", ClientType::Claude).await;
    connect(bridge.registry(), "b", ClientType::Cline).await;

    bridge
        .handle_peer_message(accept("a", Some("b"), "conn-9").into_message())
        .await
        .unwrap();

    assert_eq!(
        bridge.registry().get_client("a").await.unwrap().state,
        ConnectionState::Connected
    );
    let established = HandshakeMessage::try_from_message(&sink.delivered()[0]).unwrap();
    assert_eq!(established.target_client_id.as_deref(), Some("b"));
}

#[tokio::test]
async fn initiate_without_peer_type_is_rejected() {
    let (bridge, _sink) = bridge_with(BridgeConfig::default());
    let err = bridge
        .handle_peer_message(initiate("a", None, "conn-1").into_message())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Handshake(_)));
}

#[tokio::test]
async fn bridge_originated_phases_are_ignored() {
    let (bridge, sink) = bridge_with(BridgeConfig::default());
    let request = HandshakeMessage::new(
        HandshakePhase::Established,
        "x",
        Some("y".into()),
        HandshakePayload {
            capabilities: ClientCapabilities::default(),
            connection_id: "conn-1".into(),
        },
    );
    bridge
        .handle_peer_message(request.into_message())
        .await
        .unwrap();
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn unanswered_handshake_times_out_to_error() {
    let config = BridgeConfig {
        handshake_timeout_seconds: 1,
        ..BridgeConfig::default()
    };
    let (bridge, _sink) = bridge_with(config);

    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(
        bridge.registry().get_client("a").await.unwrap().state,
        ConnectionState::Error
    );
    assert_eq!(bridge.handshakes().pending_count().await, 0);
}

#[tokio::test]
async fn handshake_without_timeout_stays_parked() {
    let (bridge, _sink) = bridge_with(BridgeConfig::default());
    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        bridge.registry().get_client("a").await.unwrap().state,
        ConnectionState::Handshaking
    );
}

#[tokio::test]
async fn disconnecting_parked_initiator_drops_pending() {
    let (bridge, _sink) = bridge_with(BridgeConfig::default());
    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();
    assert_eq!(bridge.handshakes().pending_count().await, 1);

    bridge.disconnect_peer("a").await;

    assert_eq!(bridge.handshakes().pending_count().await, 0);
    let a = bridge.registry().get_client("a").await.unwrap();
    assert!(!a.connected);
    assert_eq!(a.state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnecting_awaited_peer_drops_pending() {
    let (bridge, _sink) = bridge_with(BridgeConfig::default());
    connect(bridge.registry(), "b", ClientType::Cline).await;
    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();

    assert_eq!(bridge.handshakes().forget_client("b").await, 1);
    assert_eq!(bridge.handshakes().pending_count().await, 0);
}

#[tokio::test]
async fn swept_initiator_is_pruned() {
    let (bridge, _sink) = bridge_with(BridgeConfig::default());
    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();

    bridge.registry().disconnect_client("a").await;
    let later = chrono::Utc::now() + chrono::Duration::days(365);
    let report = bridge.registry().sweep_expired(later).await;
    assert_eq!(report.clients_removed, 1);
    assert_eq!(bridge.handshakes().pending_count().await, 1);

    assert_eq!(bridge.handshakes().prune().await, 1);
    assert_eq!(bridge.handshakes().pending_count().await, 0);
}

#[tokio::test]
async fn new_initiate_prunes_orphaned_introductions() {
    let (bridge, _sink) = bridge_with(BridgeConfig::default());
    bridge
        .handle_peer_message(initiate("a", Some(ClientType::Cline), "conn-1").into_message())
        .await
        .unwrap();
    bridge.registry().disconnect_client("a").await;

    bridge
        .handle_peer_message(initiate("c", Some(ClientType::Cline), "conn-2").into_message())
        .await
        .unwrap();
    assert_eq!(bridge.handshakes().pending_count().await, 1);
}
