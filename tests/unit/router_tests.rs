//! Router tests: explicit targets, rule lookup, and failure reporting.

use std::sync::Arc;

use mcp_bridge::config::{RoutingConfig, RoutingRule};
use mcp_bridge::models::client::ClientType;
use mcp_bridge::models::message::Message;
use mcp_bridge::router::Router;
use mcp_bridge::AppError;

use super::test_helpers::{connect, registry, RecordingSink};

fn optimize_rule() -> RoutingConfig {
    let mut config = RoutingConfig::default();
    config.rules.insert(
        "tools/optimize_code".into(),
        RoutingRule {
            target_type: ClientType::Claude,
            priority: 0,
        },
    );
    config
}

#[tokio::test]
async fn rule_routes_to_connected_client_of_type() {
    let registry = registry();
    connect(&registry, "c1", ClientType::Claude).await;
    let sink = Arc::new(RecordingSink::default());
    let router = Router::new(optimize_rule(), registry, sink.clone());

    let msg = Message::request("tools/optimize_code", "src", serde_json::json!({}));
    assert!(router.route_message(&msg).await);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].target_client_id.as_deref(), Some("c1"));
    assert_eq!(delivered[0].id, msg.id);
    assert!(msg.target_client_id.is_none(), "caller's message is not mutated");
}

#[tokio::test]
async fn empty_registry_reports_no_available_clients() {
    let sink = Arc::new(RecordingSink::default());
    let router = Router::new(optimize_rule(), registry(), sink.clone());
    let mut errors = router.subscribe_errors();

    let msg = Message::request("tools/optimize_code", "src", serde_json::json!({}));
    assert!(!router.route_message(&msg).await);
    assert!(sink.delivered().is_empty());

    let failure = errors.recv().await.unwrap();
    assert_eq!(failure.message_id, msg.id);
    assert!(
        matches!(&failure.error, AppError::Routing(text) if text.contains("No available clients")),
        "unexpected error: {:?}",
        failure.error
    );
}

#[tokio::test]
async fn explicit_target_bypasses_rules() {
    let registry = registry();
    connect(&registry, "c1", ClientType::Claude).await;
    let sink = Arc::new(RecordingSink::default());
    let router = Router::new(optimize_rule(), registry, sink.clone());

    let msg = Message::request("tools/optimize_code", "src", serde_json::Value::Null)
        .with_target("elsewhere");
    assert!(router.route_message(&msg).await);
    assert_eq!(
        sink.delivered()[0].target_client_id.as_deref(),
        Some("elsewhere")
    );
}

#[tokio::test]
async fn disconnected_clients_are_not_targets() {
    let registry = registry();
    connect(&registry, "c1", ClientType::Claude).await;
    registry.disconnect_client("c1").await;
    let router = Router::new(
        optimize_rule(),
        registry,
        Arc::new(RecordingSink::default()),
    );

    let msg = Message::request("tools/optimize_code", "src", serde_json::Value::Null);
    assert!(matches!(
        router.try_route(&msg).await,
        Err(AppError::Routing(_))
    ));
}

#[tokio::test]
async fn first_client_by_id_is_selected() {
    let registry = registry();
    connect(&registry, "z", ClientType::Claude).await;
    connect(&registry, "m", ClientType::Claude).await;
    let router = Router::new(
        optimize_rule(),
        registry,
        Arc::new(RecordingSink::default()),
    );

    let msg = Message::request("tools/optimize_code", "src", serde_json::Value::Null);
    let routed = router.try_route(&msg).await.unwrap();
    assert_eq!(routed.target_client_id.as_deref(), Some("m"));
}
