//! Per-connection handle and state machine.
//!
//! A [`Connection`] is the engine's view of one client: an id, the outbound
//! frame queue drained by the connection's session task, and the protocol
//! state (phase, negotiated heartbeat periods, activity clock). Handles are
//! cheap clones; subscriptions and transactions hold them across tasks.

use crate::protocol::Frame;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;

/// Outbound queue depth per connection. Consumers that stay behind longer
/// than the delivery timeout are closed rather than blocking producers.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// How long a dispatch write may wait on a full consumer queue.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Session lifecycle; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

#[derive(Debug)]
struct ConnState {
    phase: SessionPhase,
    version: Option<String>,
    session_id: Option<String>,
    ping_ms: u64,
    pong_ms: u64,
    last_activity: Instant,
    last_ping: Instant,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Frame>,
    state: Mutex<ConnState>,
    closing: AtomicBool,
    close_signal: Notify,
}

/// Cloneable handle to one client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Heartbeat bookkeeping snapshot consumed by the session loop.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSnapshot {
    pub ping_ms: u64,
    pub pong_ms: u64,
    pub last_activity: Instant,
    pub last_ping: Instant,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<Frame>,
        now: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                outbound,
                state: Mutex::new(ConnState {
                    phase: SessionPhase::Connecting,
                    version: None,
                    session_id: None,
                    ping_ms: 0,
                    pong_ms: 0,
                    last_activity: now,
                    last_ping: now,
                }),
                closing: AtomicBool::new(false),
                close_signal: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    pub fn version(&self) -> Option<String> {
        self.inner.state.lock().version.clone()
    }

    /// Transition to `Connected` with the negotiation outcome.
    pub fn mark_connected(
        &self,
        version: &str,
        session_id: &str,
        ping_ms: u64,
        pong_ms: u64,
        now: Instant,
    ) {
        let mut state = self.inner.state.lock();
        state.phase = SessionPhase::Connected;
        state.version = Some(version.to_string());
        state.session_id = Some(session_id.to_string());
        state.ping_ms = ping_ms;
        state.pong_ms = pong_ms;
        state.last_activity = now;
        state.last_ping = now;
    }

    pub fn mark_closed(&self) {
        self.inner.state.lock().phase = SessionPhase::Closed;
    }

    /// Refresh the activity clock; every inbound byte counts.
    pub fn touch(&self, now: Instant) {
        self.inner.state.lock().last_activity = now;
    }

    pub fn mark_ping_sent(&self, now: Instant) {
        self.inner.state.lock().last_ping = now;
    }

    pub fn heartbeat(&self) -> HeartbeatSnapshot {
        let state = self.inner.state.lock();
        HeartbeatSnapshot {
            ping_ms: state.ping_ms,
            pong_ms: state.pong_ms,
            last_activity: state.last_activity,
            last_ping: state.last_ping,
        }
    }

    /// Enqueue a control frame for this connection's own session (receipts,
    /// errors, CONNECTED). Never waits: a connection that cannot drain its
    /// own control frames is torn down.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        match self.inner.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("{} outbound queue full, closing", self.inner.id);
                self.begin_close();
                Err(SendError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Deliver a dispatched MESSAGE, waiting briefly on transport
    /// backpressure. A consumer still full after [`DELIVERY_TIMEOUT`] is
    /// closed; the producer is never blocked indefinitely.
    pub async fn deliver(&self, frame: Frame) -> Result<(), SendError> {
        match self
            .inner
            .outbound
            .send_timeout(frame, DELIVERY_TIMEOUT)
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                tracing::warn!("{} cannot keep up with deliveries, closing", self.inner.id);
                self.begin_close();
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Ask the session task to tear the connection down.
    pub fn begin_close(&self) {
        if !self.inner.closing.swap(true, Ordering::SeqCst) {
            self.inner.close_signal.notify_one();
        }
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Resolves once `begin_close` has been called.
    pub async fn closed(&self) {
        if self.is_closing() {
            return;
        }
        self.inner.close_signal.notified().await;
    }
}
