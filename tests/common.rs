//! Common test harness for integration tests.
//!
//! Provides:
//! - a broker spawner on an ephemeral port with custom options
//! - a raw STOMP client over `TcpStream` using the crate's own codec
//!
//! All helpers use only existing dependencies.

// Not all test files use all helpers; silence dead_code warnings.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stompd::core::options::ServerOptions;
use stompd::core::time::SystemClock;
use stompd::net::listener::StompListener;
use stompd::net::security::AuthProvider;
use stompd::protocol::codec::{write_frame, FrameEvent, FrameLimits, FrameReader};
use stompd::protocol::frame::headers;
use stompd::protocol::{Command, Frame};
use stompd::session::engine::StompServer;
use stompd::session::handler::DefaultHandler;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A broker serving on an ephemeral loopback port.
pub struct TestBroker {
    pub server: Arc<StompServer<SystemClock>>,
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestBroker {
    pub async fn start(options: ServerOptions) -> Self {
        Self::start_with(options, None).await
    }

    pub async fn start_with(
        options: ServerOptions,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        let mut server = StompServer::new(options, SystemClock);
        if let Some(provider) = auth {
            server = server.with_auth(provider);
        }
        let server = Arc::new(server);
        let listener = StompListener::bind("127.0.0.1:0").await.expect("bind broker");
        let addr = listener.local_addr();
        let serving = server.clone();
        let task = tokio::spawn(async move {
            let _ = listener.serve(serving, Arc::new(DefaultHandler)).await;
        });
        Self { server, addr, task }
    }

    pub fn transaction_count(&self) -> usize {
        self.server.transaction_count()
    }

    /// Poll until the live transaction count reaches `expected`.
    pub async fn wait_transaction_count(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            if self.server.transaction_count() == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "transaction count never reached {expected} (now {})",
                self.server.transaction_count()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Raw STOMP client speaking the crate codec over a TcpStream.
pub struct TestClient {
    stream: TcpStream,
    frames: FrameReader,
}

impl TestClient {
    pub async fn connect(broker: &TestBroker) -> Self {
        let stream = TcpStream::connect(broker.addr).await.expect("connect broker");
        Self {
            stream,
            frames: FrameReader::new(FrameLimits::default()),
        }
    }

    /// CONNECT (no heartbeats) and expect CONNECTED.
    pub async fn handshake(&mut self) -> Frame {
        let reply = self
            .handshake_with(&[
                (headers::ACCEPT_VERSION, "1.0,1.1,1.2"),
                (headers::HEARTBEAT, "0,0"),
                ("host", "localhost"),
            ])
            .await;
        assert_eq!(reply.command, Command::Connected, "handshake reply: {reply}");
        reply
    }

    /// CONNECT with explicit headers; returns the server's reply frame
    /// (CONNECTED or ERROR).
    pub async fn handshake_with(&mut self, connect_headers: &[(&str, &str)]) -> Frame {
        let mut frame = Frame::new(Command::Connect);
        for (key, value) in connect_headers {
            frame.headers.add(*key, *value);
        }
        self.send_frame(frame).await;
        self.recv().await
    }

    /// Raw stream access for writing deliberately malformed bytes.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        write_frame(&mut self.stream, &frame, false)
            .await
            .expect("write frame");
    }

    /// Next frame, skipping heart-beat EOLs. Panics after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Frame {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = timeout(remaining, self.frames.read_event(&mut self.stream))
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed while waiting for frame");
            match event {
                FrameEvent::Frame(frame) => return frame,
                FrameEvent::Heartbeat => {}
            }
        }
    }

    /// Next frame within `wait`, or `None` when nothing arrives.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            match timeout(remaining, self.frames.read_event(&mut self.stream)).await {
                Err(_) => return None,
                Ok(Err(_)) => return None,
                Ok(Ok(FrameEvent::Frame(frame))) => return Some(frame),
                Ok(Ok(FrameEvent::Heartbeat)) => {}
            }
        }
    }

    /// Whether the server closes the connection within `wait`.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return false;
            };
            match timeout(remaining, self.frames.read_event(&mut self.stream)).await {
                Err(_) => return false,
                Ok(Err(err)) => return err.is_disconnect(),
                Ok(Ok(FrameEvent::Heartbeat)) => {}
                Ok(Ok(FrameEvent::Frame(frame))) => {
                    panic!("expected close, received {frame}");
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Convenience commands
    // -------------------------------------------------------------------

    /// SUBSCRIBE and wait for the receipt so the registration is visible.
    pub async fn subscribe(&mut self, destination: &str, id: &str, ack: &str) {
        let receipt_id = format!("sub-{id}");
        let frame = Frame::new(Command::Subscribe)
            .with_header(headers::ID, id)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::ACK, ack)
            .with_header(headers::RECEIPT, &receipt_id);
        self.send_frame(frame).await;
        self.expect_receipt(&receipt_id).await;
    }

    pub async fn expect_receipt(&mut self, receipt_id: &str) {
        let frame = self.recv().await;
        assert_eq!(frame.command, Command::Receipt, "expected receipt: {frame}");
        assert_eq!(frame.header(headers::RECEIPT_ID), Some(receipt_id));
    }

    pub async fn send_body(&mut self, destination: &str, body: &str) {
        let frame = Frame::new(Command::Send)
            .with_header(headers::DESTINATION, destination)
            .with_body(body);
        self.send_frame(frame).await;
    }

    pub async fn send_in_tx(&mut self, destination: &str, tx: &str, body: &str) {
        let frame = Frame::new(Command::Send)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::TRANSACTION, tx)
            .with_body(body);
        self.send_frame(frame).await;
    }

    pub async fn begin(&mut self, tx: &str) {
        self.send_frame(Frame::new(Command::Begin).with_header(headers::TRANSACTION, tx))
            .await;
    }

    pub async fn commit(&mut self, tx: &str) {
        self.send_frame(Frame::new(Command::Commit).with_header(headers::TRANSACTION, tx))
            .await;
    }

    pub async fn abort(&mut self, tx: &str) {
        self.send_frame(Frame::new(Command::Abort).with_header(headers::TRANSACTION, tx))
            .await;
    }

    pub async fn ack(&mut self, ack_id: &str) {
        self.send_frame(Frame::new(Command::Ack).with_header(headers::ID, ack_id))
            .await;
    }

    pub async fn nack(&mut self, ack_id: &str) {
        self.send_frame(Frame::new(Command::Nack).with_header(headers::ID, ack_id))
            .await;
    }
}
