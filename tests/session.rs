//! Session lifecycle over a live broker: negotiation, authentication,
//! receipts, protocol errors, and heart-beat enforcement.

mod common;

use common::{TestBroker, TestClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stompd::core::options::ServerOptions;
use stompd::net::security::StaticAuthProvider;
use stompd::protocol::frame::headers;
use stompd::protocol::{Command, Frame};

#[tokio::test]
async fn test_connect_negotiates_highest_version() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;

    let reply = client
        .handshake_with(&[(headers::ACCEPT_VERSION, "1.0,1.1"), (headers::HEARTBEAT, "0,0")])
        .await;
    assert_eq!(reply.command, Command::Connected);
    assert_eq!(reply.header(headers::VERSION), Some("1.1"));
    assert!(reply.header(headers::SESSION).is_some());
    assert!(reply.header(headers::SERVER).unwrap().starts_with("stompd/"));
}

#[tokio::test]
async fn test_connect_without_accept_version_is_stomp_10() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;

    let reply = client.handshake_with(&[]).await;
    assert_eq!(reply.command, Command::Connected);
    assert_eq!(reply.header(headers::VERSION), Some("1.0"));
}

#[tokio::test]
async fn test_connect_version_mismatch() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;

    let reply = client.handshake_with(&[(headers::ACCEPT_VERSION, "9.9")]).await;
    assert_eq!(reply.command, Command::Error);
    assert!(reply
        .header(headers::MESSAGE)
        .unwrap()
        .contains("unsupported protocol version"));
    assert!(client.closed_within(common::RECV_TIMEOUT).await);
}

#[tokio::test]
async fn test_stomp_frame_connects() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;

    let stomp = Frame::new(Command::Stomp).with_header(headers::ACCEPT_VERSION, "1.2");
    client.send_frame(stomp).await;
    let reply = client.recv().await;
    assert_eq!(reply.command, Command::Connected);
    assert_eq!(reply.header(headers::VERSION), Some("1.2"));
}

#[tokio::test]
async fn test_frame_before_connect_is_fatal() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;

    let send = Frame::new(Command::Send).with_header(headers::DESTINATION, "/queue/q");
    client.send_frame(send).await;

    let error = client.recv().await;
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.header(headers::MESSAGE), Some("not connected"));
    assert!(client.closed_within(common::RECV_TIMEOUT).await);
}

#[tokio::test]
async fn test_second_connect_is_fatal() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;
    client.handshake().await;

    let reply = client
        .handshake_with(&[(headers::ACCEPT_VERSION, "1.2")])
        .await;
    assert_eq!(reply.command, Command::Error);
    assert_eq!(reply.header(headers::MESSAGE), Some("already connected"));
}

#[tokio::test]
async fn test_authentication() {
    let mut users = HashMap::new();
    users.insert("alice".to_string(), "secret".to_string());
    let options = ServerOptions {
        secured: true,
        ..ServerOptions::default()
    };
    let broker =
        TestBroker::start_with(options, Some(Arc::new(StaticAuthProvider::new(users)))).await;

    let mut rejected = TestClient::connect(&broker).await;
    let reply = rejected
        .handshake_with(&[
            (headers::ACCEPT_VERSION, "1.2"),
            (headers::LOGIN, "alice"),
            (headers::PASSCODE, "wrong"),
        ])
        .await;
    assert_eq!(reply.command, Command::Error);
    assert_eq!(reply.header(headers::MESSAGE), Some("Authentication failed"));
    assert!(rejected.closed_within(common::RECV_TIMEOUT).await);

    let mut accepted = TestClient::connect(&broker).await;
    let reply = accepted
        .handshake_with(&[
            (headers::ACCEPT_VERSION, "1.2"),
            (headers::LOGIN, "alice"),
            (headers::PASSCODE, "secret"),
        ])
        .await;
    assert_eq!(reply.command, Command::Connected);
}

#[tokio::test]
async fn test_receipt_follows_side_effects() {
    let broker = TestBroker::start(ServerOptions::default()).await;

    let mut sub = TestClient::connect(&broker).await;
    sub.handshake().await;
    sub.subscribe("/topic/t", "0", "auto").await;

    let mut producer = TestClient::connect(&broker).await;
    producer.handshake().await;
    let send = Frame::new(Command::Send)
        .with_header(headers::DESTINATION, "/topic/t")
        .with_header(headers::RECEIPT, "r-send")
        .with_body("payload");
    producer.send_frame(send).await;
    producer.expect_receipt("r-send").await;

    // The RECEIPT was emitted after dispatch, so the message is already out.
    let message = sub.recv().await;
    assert_eq!(message.body_as_string(), "payload");
    assert_eq!(message.header(headers::RECEIPT), None);
}

#[tokio::test]
async fn test_heartbeat_header_negotiation() {
    let options = ServerOptions {
        heartbeat: (150, 150),
        ..ServerOptions::default()
    };
    let broker = TestBroker::start(options).await;
    let mut client = TestClient::connect(&broker).await;

    let reply = client
        .handshake_with(&[
            (headers::ACCEPT_VERSION, "1.2"),
            (headers::HEARTBEAT, "100,100"),
        ])
        .await;
    assert_eq!(reply.command, Command::Connected);
    // ping = max(cx=100, sy=150); pong = max(cy=100, sx=150).
    assert_eq!(reply.header(headers::HEARTBEAT), Some("150,150"));
}

#[tokio::test]
async fn test_silent_client_is_disconnected() {
    let options = ServerOptions {
        heartbeat: (100, 100),
        ..ServerOptions::default()
    };
    let broker = TestBroker::start(options).await;
    let mut client = TestClient::connect(&broker).await;

    let reply = client
        .handshake_with(&[
            (headers::ACCEPT_VERSION, "1.2"),
            (headers::HEARTBEAT, "100,100"),
        ])
        .await;
    assert_eq!(reply.command, Command::Connected);

    // Stay silent: the server must close after missing two pong windows.
    assert!(client.closed_within(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn test_no_heartbeat_when_disabled() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;
    client.handshake().await; // advertises 0,0

    // No pings, no disconnect.
    assert!(client.try_recv(Duration::from_millis(600)).await.is_none());
    client.subscribe("/topic/still-alive", "0", "auto").await;
}

#[tokio::test]
async fn test_malformed_frame_is_fatal() {
    let broker = TestBroker::start(ServerOptions::default()).await;
    let mut client = TestClient::connect(&broker).await;
    client.handshake().await;

    use tokio::io::AsyncWriteExt;
    client
        .stream_mut()
        .write_all(b"GIBBERISH\n\n\0")
        .await
        .unwrap();

    let error = client.recv().await;
    assert_eq!(error.command, Command::Error);
    assert!(error
        .header(headers::MESSAGE)
        .unwrap()
        .contains("malformed frame"));
    assert!(client.closed_within(common::RECV_TIMEOUT).await);
}

#[tokio::test]
async fn test_body_limit_is_fatal() {
    let options = ServerOptions {
        max_body_length: 16,
        ..ServerOptions::default()
    };
    let broker = TestBroker::start(options).await;
    let mut client = TestClient::connect(&broker).await;
    client.handshake().await;

    client
        .send_body("/topic/t", "this body is much longer than sixteen bytes")
        .await;
    let error = client.recv().await;
    assert_eq!(error.command, Command::Error);
    assert!(error.header(headers::MESSAGE).unwrap().contains("body exceeds"));
    assert!(client.closed_within(common::RECV_TIMEOUT).await);
}
