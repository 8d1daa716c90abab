//! Connection adapter and outbound client tests over real Unix streams.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use mcp_bridge::models::envelope::{Envelope, FrameContent};
use mcp_bridge::socket::{
    ConnectionAdapter, FrameOptions, ListenerConfig, SocketClient, SocketEvent, SocketListener,
};
use mcp_bridge::AppError;

use super::test_helpers::{socket_in_tempdir, wait_for, EVENT_TIMEOUT};

async fn next(rx: &mut mpsc::UnboundedReceiver<SocketEvent>) -> SocketEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out")
        .expect("event channel closed")
}

async fn next_text(rx: &mut mpsc::UnboundedReceiver<SocketEvent>) -> String {
    match next(rx).await {
        SocketEvent::Message { envelope, .. } => envelope.to_string(),
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn chunked_writes_yield_frames_in_order() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _adapter = ConnectionAdapter::spawn("c1", ours, FrameOptions::default(), tx);

    for chunk in [&b"fir"[..], b"st\nsec", b"ond\n", b"  \n", b"third\n"] {
        theirs.write_all(chunk).await.unwrap();
        theirs.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(next_text(&mut rx).await, "first");
    assert_eq!(next_text(&mut rx).await, "second");
    assert_eq!(next_text(&mut rx).await, "third");
}

#[tokio::test]
async fn overflow_is_reported_and_stream_recovers() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _adapter = ConnectionAdapter::spawn("c1", ours, FrameOptions::new("\n", 16), tx);

    theirs.write_all(&[b'x'; 64]).await.unwrap();
    theirs.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    theirs.write_all(b"ok\n").await.unwrap();

    match next(&mut rx).await {
        SocketEvent::Error { connection_id, error } => {
            assert_eq!(connection_id.as_deref(), Some("c1"));
            assert!(matches!(error, AppError::Frame(_)));
        }
        other => panic!("expected overflow error, got {other:?}"),
    }
    assert_eq!(next_text(&mut rx).await, "ok");
}

#[tokio::test]
async fn send_and_receive_refresh_last_activity() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = ConnectionAdapter::spawn("c1", ours, FrameOptions::default(), tx);
    let created = adapter.last_activity();

    tokio::time::sleep(Duration::from_millis(30)).await;
    adapter.send(&Envelope::from("ping")).await.unwrap();
    let after_send = adapter.last_activity();
    assert!(after_send > created);

    tokio::time::sleep(Duration::from_millis(30)).await;
    theirs.write_all(b"pong\n").await.unwrap();
    assert_eq!(next_text(&mut rx).await, "pong");
    assert!(adapter.last_activity() > after_send);
}

#[tokio::test]
async fn send_appends_delimiter_once() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let adapter = ConnectionAdapter::spawn("c1", ours, FrameOptions::default(), tx);

    adapter.send(&Envelope::from("one")).await.unwrap();
    adapter.send(&Envelope::from("two\n")).await.unwrap();
    adapter.disconnect().await;

    let mut out = String::new();
    theirs.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "one\ntwo\n");
}

#[tokio::test]
async fn disconnect_is_reported_once_and_blocks_sends() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = ConnectionAdapter::spawn("c1", ours, FrameOptions::default(), tx);

    adapter.disconnect().await;
    adapter.disconnect().await;
    drop(theirs);

    assert!(matches!(
        next(&mut rx).await,
        SocketEvent::Disconnected { ref connection_id } if connection_id == "c1"
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "disconnect reported twice");

    assert!(!adapter.is_active());
    assert!(matches!(
        adapter.send(&Envelope::from("late")).await,
        Err(AppError::Transport(_))
    ));
}

#[tokio::test]
async fn peer_close_is_reported() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = ConnectionAdapter::spawn("c1", ours, FrameOptions::default(), tx);

    drop(theirs);
    assert!(matches!(next(&mut rx).await, SocketEvent::Disconnected { .. }));
    assert!(!adapter.is_active());
}

#[tokio::test]
async fn client_and_listener_exchange_frames() {
    let (_dir, path) = socket_in_tempdir();
    let listener = SocketListener::new(ListenerConfig::new(&path));
    let mut server_events = listener.subscribe();
    listener.start().await.unwrap();

    let client = SocketClient::connect(&path, FrameOptions::default()).await.unwrap();
    let mut client_events = client.subscribe();
    let connection_id = wait_for(&mut server_events, |e| match e {
        SocketEvent::Connected { connection_id } => Some(connection_id.clone()),
        _ => None,
    })
    .await;

    client
        .send(&Envelope::from(serde_json::json!({"hello": "bridge"})))
        .await
        .unwrap();
    let inbound = wait_for(&mut server_events, |e| match e {
        SocketEvent::Message { connection_id, envelope } => {
            Some((connection_id.clone(), envelope.clone()))
        }
        _ => None,
    })
    .await;
    assert_eq!(inbound.0, connection_id);
    assert_eq!(inbound.1.as_json(), Some(&serde_json::json!({"hello": "bridge"})));

    listener
        .send_to_client(&connection_id, &Envelope::from("reply"))
        .await
        .unwrap();
    let reply = wait_for(&mut client_events, |e| match e {
        SocketEvent::Message { envelope, .. } => Some(envelope.content.clone()),
        _ => None,
    })
    .await;
    assert_eq!(reply, FrameContent::Text("reply".into()));

    client.disconnect().await;
    wait_for(&mut server_events, |e| match e {
        SocketEvent::Disconnected { connection_id: id } if *id == connection_id => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(listener.connection_count().await, 0);

    listener.stop().await;
}

#[tokio::test]
async fn client_connect_to_missing_socket_fails() {
    let (_dir, path) = socket_in_tempdir();
    let err = SocketClient::connect(&path, FrameOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transport(_)));
}
