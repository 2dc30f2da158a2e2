//! TCP listener and the per-connection session loop.
//!
//! Each accepted socket gets one task that owns both stream halves and
//! multiplexes three concerns with `select!`: draining the connection's
//! outbound frame queue, reading inbound frames, and the heart-beat
//! deadlines (PING emission and idle disconnect). Frame handling is
//! sequential per connection; different connections run in parallel.

use crate::core::time::Clock;
use crate::protocol::codec::{write_frame, FrameEvent, FrameReader};
use crate::protocol::Frame;
use crate::session::connection::{Connection, OUTBOUND_QUEUE_DEPTH};
use crate::session::engine::{SessionAction, StompServer};
use crate::session::handler::StompHandler;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Idle poll period when no heart-beat deadline is armed.
const IDLE_TICK: Duration = Duration::from_secs(5);

pub struct StompListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl StompListener {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind STOMP listener on {addr}"))?;
        let local_addr = listener.local_addr().context("listener local addr")?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, spawning one session task per socket.
    pub async fn serve<C>(
        self,
        server: Arc<StompServer<C>>,
        handler: Arc<dyn StompHandler<C>>,
    ) -> Result<()>
    where
        C: Clock,
    {
        tracing::info!("STOMP listener accepting on {}", self.local_addr);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let server = server.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        run_session(stream, peer, server, handler).await;
                    });
                }
                Err(err) => {
                    tracing::warn!("accept failed: {err}");
                }
            }
        }
    }
}

/// Drive one connection until it disconnects, errors, or is closed.
async fn run_session<C>(
    stream: TcpStream,
    peer: SocketAddr,
    server: Arc<StompServer<C>>,
    handler: Arc<dyn StompHandler<C>>,
) where
    C: Clock,
{
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let conn = server.new_connection(Some(peer), outbound_tx);
    tracing::debug!("{} accepted from {}", conn.id(), peer);

    let trailing = server.options().trailing_line;
    let mut frames = FrameReader::new(server.options().frame_limits());
    let (mut reader, mut writer) = stream.into_split();

    loop {
        if conn.is_closing() {
            break;
        }
        let now = server.clock().now();
        let (ping_deadline, pong_deadline) = heartbeat_deadlines(&conn);
        let sleep_for = next_sleep(ping_deadline, pong_deadline, now);

        tokio::select! {
            maybe_frame = outbound_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if write_frame(&mut writer, &frame, trailing).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = conn.closed() => {
                break;
            }
            event = frames.read_event(&mut reader) => {
                match event {
                    Ok(FrameEvent::Heartbeat) => {
                        conn.touch(server.clock().now());
                    }
                    Ok(FrameEvent::Frame(frame)) => {
                        conn.touch(server.clock().now());
                        match server.handle_frame(handler.as_ref(), &conn, frame).await {
                            SessionAction::Continue => {}
                            SessionAction::Close => break,
                        }
                    }
                    Err(err) if err.is_disconnect() => {
                        tracing::debug!("{} transport closed", conn.id());
                        break;
                    }
                    Err(err) => {
                        let _ = conn.send(Frame::error(&format!("malformed frame: {err}"), ""));
                        break;
                    }
                }
            }
            _ = server.clock().sleep(sleep_for) => {
                let now = server.clock().now();
                if let Some(deadline) = pong_deadline {
                    if now >= deadline {
                        let idle = now
                            .saturating_duration_since(conn.heartbeat().last_activity)
                            .as_millis();
                        tracing::warn!("{} no client activity in the last {idle} ms, disconnecting", conn.id());
                        break;
                    }
                }
                if let Some(deadline) = ping_deadline {
                    if now >= deadline {
                        if write_frame(&mut writer, &Frame::ping(), trailing).await.is_err() {
                            break;
                        }
                        conn.mark_ping_sent(now);
                    }
                }
            }
        }
    }

    flush_outbound(&mut writer, &mut outbound_rx, trailing).await;
    drop(reader);
    let _ = writer.shutdown().await;
    server.teardown(&conn);
}

/// Write out frames still queued at close time (receipts, the final ERROR).
async fn flush_outbound(
    writer: &mut OwnedWriteHalf,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    trailing: bool,
) {
    outbound_rx.close();
    while let Ok(frame) = outbound_rx.try_recv() {
        if write_frame(writer, &frame, trailing).await.is_err() {
            break;
        }
    }
}

fn heartbeat_deadlines(conn: &Connection) -> (Option<Instant>, Option<Instant>) {
    let hb = conn.heartbeat();
    let ping = (hb.ping_ms > 0).then(|| hb.last_ping + Duration::from_millis(hb.ping_ms));
    // The pong window tolerates one missed beat before disconnecting.
    let pong = (hb.pong_ms > 0).then(|| hb.last_activity + Duration::from_millis(2 * hb.pong_ms));
    (ping, pong)
}

fn next_sleep(ping: Option<Instant>, pong: Option<Instant>, now: Instant) -> Duration {
    let deadline = match (ping, pong) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    deadline
        .map(|d| {
            d.saturating_duration_since(now)
                .max(Duration::from_millis(10))
        })
        .unwrap_or(IDLE_TICK)
}
