//! Listener and client transports exchanging string messages.

use std::time::Duration;

use mcp_bridge::socket::{FrameOptions, ListenerConfig};
use mcp_bridge::transport::{ClientTransport, ListenerTransport, MessageTransport, TransportEvent};
use mcp_bridge::AppError;

use super::test_helpers::{socket_in_tempdir, wait_for, wait_for_connections};

fn message(event: &TransportEvent) -> Option<String> {
    match event {
        TransportEvent::Message(text) => Some(text.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let (_dir, path) = socket_in_tempdir();
    let server = ListenerTransport::new(ListenerConfig::new(&path));
    let mut server_events = server.subscribe();
    server.connect().await.unwrap();
    server.connect().await.unwrap();

    let client = ClientTransport::new(&path, FrameOptions::default());
    let mut client_events = client.subscribe();
    client.connect().await.unwrap();
    wait_for_connections(server.listener(), 1).await;

    client.send(r#"{"jsonrpc":"2.0","id":1}"#).await.unwrap();
    assert_eq!(
        wait_for(&mut server_events, message).await,
        r#"{"jsonrpc":"2.0","id":1}"#
    );

    server.send("pong").await.unwrap();
    assert_eq!(wait_for(&mut client_events, message).await, "pong");

    client.disconnect().await.unwrap();
    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn queued_subscriber_receives_a_burst_in_order() {
    const MESSAGES: usize = 1500;
    let (_dir, path) = socket_in_tempdir();
    let server = ListenerTransport::new(ListenerConfig::new(&path));
    let mut queue = server.subscribe_queue();
    server.connect().await.unwrap();

    let client = ClientTransport::new(&path, FrameOptions::default());
    client.connect().await.unwrap();
    for n in 0..MESSAGES {
        client.send(&format!("m{n}")).await.unwrap();
    }

    let mut received = Vec::with_capacity(MESSAGES);
    tokio::time::timeout(Duration::from_secs(10), async {
        while received.len() < MESSAGES {
            if let Some(text) = message(&queue.recv().await.expect("queue open")) {
                received.push(text);
            }
        }
    })
    .await
    .expect("every message delivered");
    assert_eq!(received, (0..MESSAGES).map(|n| format!("m{n}")).collect::<Vec<_>>());

    client.disconnect().await.unwrap();
    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn send_before_connect_fails() {
    let (_dir, path) = socket_in_tempdir();
    let client = ClientTransport::new(&path, FrameOptions::default());
    assert!(matches!(client.send("hi").await, Err(AppError::Transport(_))));
}

#[tokio::test]
async fn listener_shutdown_closes_both_sides() {
    let (_dir, path) = socket_in_tempdir();
    let server = ListenerTransport::new(ListenerConfig::new(&path));
    let mut server_events = server.subscribe();
    server.connect().await.unwrap();

    let client = ClientTransport::new(&path, FrameOptions::default());
    let mut client_events = client.subscribe();
    client.connect().await.unwrap();
    wait_for_connections(server.listener(), 1).await;

    server.disconnect().await.unwrap();

    wait_for(&mut server_events, |e| (*e == TransportEvent::Closed).then_some(())).await;
    wait_for(&mut client_events, |e| (*e == TransportEvent::Closed).then_some(())).await;
    assert!(!path.exists());
}
