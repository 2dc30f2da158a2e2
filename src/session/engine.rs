//! The session engine: standard semantics for every STOMP command.
//!
//! [`StompServer`] owns the shared broker state (options, destination
//! registry, transaction manager, authentication provider, hooks) and
//! implements the default behavior the [`crate::session::handler`] trait
//! methods delegate to. One instance serves every connection of a broker.

use crate::core::options::ServerOptions;
use crate::core::time::Clock;
use crate::messaging::destinations::{AckOutcome, DestinationRegistry};
use crate::messaging::subscriptions::{AckMode, Subscription};
use crate::messaging::transactions::{Transaction, TransactionError, TransactionManager};
use crate::net::security::AuthProvider;
use crate::protocol::frame::headers;
use crate::protocol::{Command, Frame};
use crate::session::connection::{Connection, ConnectionId, SessionPhase};
use crate::session::handler::StompHandler;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the session loop should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Continue,
    /// Flush queued frames and tear the connection down.
    Close,
}

type AckHookFn = dyn Fn(&AckOutcome) + Send + Sync;
type CloseHookFn = dyn Fn(ConnectionId) + Send + Sync;

/// Optional per-server callbacks. Defaults log and nothing else.
#[derive(Clone, Default)]
pub struct ServerHooks {
    pub on_ack: Option<Arc<AckHookFn>>,
    pub on_nack: Option<Arc<AckHookFn>>,
    pub on_close: Option<Arc<CloseHookFn>>,
}

/// Shared broker state and the standard command semantics.
pub struct StompServer<C: Clock> {
    options: ServerOptions,
    destinations: DestinationRegistry,
    transactions: TransactionManager,
    auth: Option<Arc<dyn AuthProvider>>,
    hooks: ServerHooks,
    clock: C,
    next_connection_id: AtomicU64,
}

impl<C: Clock> StompServer<C> {
    pub fn new(options: ServerOptions, clock: C) -> Self {
        let auto_gc = options.destination_auto_gc;
        Self {
            options,
            destinations: DestinationRegistry::new(auto_gc),
            transactions: TransactionManager::new(),
            auth: None,
            hooks: ServerHooks::default(),
            clock,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn with_auth(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    pub fn with_hooks(mut self, hooks: ServerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn destinations(&self) -> &DestinationRegistry {
        &self.destinations
    }

    /// Live transaction count across all connections of this server.
    pub fn transaction_count(&self) -> usize {
        self.transactions.count()
    }

    pub fn destination_names(&self) -> Vec<String> {
        self.destinations.names()
    }

    /// Allocate a connection handle for a freshly accepted transport.
    pub fn new_connection(
        &self,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<Frame>,
    ) -> Connection {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        Connection::new(id, peer, outbound, self.clock.now())
    }

    fn server_header(&self) -> String {
        format!("stompd/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Session state gate (spec table): routes a frame to the handler or
    /// rejects it based on the connection phase.
    pub async fn handle_frame(
        &self,
        handler: &dyn StompHandler<C>,
        conn: &Connection,
        frame: Frame,
    ) -> SessionAction {
        match conn.phase() {
            SessionPhase::Closed => SessionAction::Continue,
            SessionPhase::Connecting => match frame.command {
                Command::Connect => handler.on_connect(self, conn, frame).await,
                Command::Stomp => handler.on_stomp(self, conn, frame).await,
                _ => self.error_and_close(conn, "not connected", Some(&frame)),
            },
            SessionPhase::Connected => match frame.command {
                Command::Connect | Command::Stomp => {
                    self.error_and_close(conn, "already connected", Some(&frame))
                }
                Command::Send => handler.on_send(self, conn, frame).await,
                Command::Subscribe => handler.on_subscribe(self, conn, frame).await,
                Command::Unsubscribe => handler.on_unsubscribe(self, conn, frame).await,
                Command::Begin => handler.on_begin(self, conn, frame).await,
                Command::Commit => handler.on_commit(self, conn, frame).await,
                Command::Abort => handler.on_abort(self, conn, frame).await,
                Command::Ack => handler.on_ack(self, conn, frame).await,
                Command::Nack => handler.on_nack(self, conn, frame).await,
                Command::Disconnect => handler.on_disconnect(self, conn, frame).await,
                Command::Ping => SessionAction::Continue,
                other => {
                    tracing::warn!("{} sent unexpected {} frame, ignoring", conn.id(), other);
                    SessionAction::Continue
                }
            },
        }
    }

    /// CONNECT/STOMP: negotiate a version, authenticate when secured, and
    /// compute the heart-beat contract.
    pub async fn connect(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let accept = frame.header(headers::ACCEPT_VERSION);
        let Some(version) = self.options.negotiate_version(accept) else {
            return self.error_and_close(
                conn,
                &format!(
                    "unsupported protocol version, server supports {}",
                    self.options.supported_versions.join(",")
                ),
                Some(&frame),
            );
        };

        if self.options.secured {
            let login = frame.header(headers::LOGIN);
            let passcode = frame.header(headers::PASSCODE);
            let authenticated = match &self.auth {
                Some(provider) => provider.authenticate(login, passcode).await.is_ok(),
                None => {
                    tracing::error!("server is secured but no auth provider is configured");
                    false
                }
            };
            if !authenticated {
                return self.error_and_close(conn, "Authentication failed", Some(&frame));
            }
        }

        let client_beat = crate::protocol::heartbeat::parse(frame.header(headers::HEARTBEAT));
        let ping = crate::protocol::heartbeat::ping_period(client_beat, self.options.heartbeat);
        let pong = crate::protocol::heartbeat::pong_period(client_beat, self.options.heartbeat);

        let session_id = uuid::Uuid::new_v4().to_string();
        conn.mark_connected(&version, &session_id, ping, pong, self.clock.now());

        let connected = Frame::connected(
            &version,
            &session_id,
            &self.server_header(),
            &crate::protocol::heartbeat::connected_header(ping, pong),
        );
        if conn.send(connected).is_err() {
            return SessionAction::Close;
        }
        tracing::info!(
            "{} connected version={} session={} heart-beat={},{}",
            conn.id(),
            version,
            session_id,
            ping,
            pong
        );
        SessionAction::Continue
    }

    /// SEND: route to the destination now, or buffer inside a transaction.
    pub async fn send(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(destination) = frame.destination().map(str::to_string) else {
            return self.error_and_close(conn, "missing destination header in SEND", Some(&frame));
        };
        let receipt = frame.receipt().map(str::to_string);

        if let Some(tx_id) = frame.transaction().map(str::to_string) {
            let result = self.transactions.add_frame(
                conn.id(),
                &tx_id,
                frame,
                self.options.max_frames_in_transaction,
            );
            if let Err(err) = result {
                return self.transaction_failure(conn, &err);
            }
        } else {
            self.destinations.dispatch(&frame, &destination).await;
        }
        self.acknowledge(conn, receipt.as_deref())
    }

    /// SUBSCRIBE: register a new (connection, id) subscription.
    pub async fn subscribe(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(id) = frame.id() else {
            return self.error_and_close(conn, "missing id header in SUBSCRIBE", Some(&frame));
        };
        let Some(destination) = frame.destination() else {
            return self.error_and_close(
                conn,
                "missing destination header in SUBSCRIBE",
                Some(&frame),
            );
        };
        if self.destinations.id_in_use(conn.id(), id) {
            return self.error_and_close(
                conn,
                &format!("duplicate subscription id '{id}'"),
                Some(&frame),
            );
        }

        let ack_mode = AckMode::from_header(frame.header(headers::ACK));
        self.destinations
            .subscribe(Subscription::new(id, conn.clone(), destination, ack_mode));
        tracing::debug!("{} subscribed id={} destination={}", conn.id(), id, destination);
        self.acknowledge(conn, frame.receipt())
    }

    /// UNSUBSCRIBE: remove a subscription by id.
    pub async fn unsubscribe(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(id) = frame.id() else {
            return self.error_and_close(conn, "missing id header in UNSUBSCRIBE", Some(&frame));
        };
        if !self.destinations.unsubscribe(conn.id(), id) {
            return self.error_and_close(conn, &format!("unknown subscription '{id}'"), Some(&frame));
        }
        self.acknowledge(conn, frame.receipt())
    }

    /// BEGIN: open an empty transaction.
    pub async fn begin(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(tx_id) = frame.transaction() else {
            return self.error_and_close(conn, "missing transaction header in BEGIN", Some(&frame));
        };
        if let Err(err) = self.transactions.begin(conn.id(), tx_id) {
            return self.transaction_failure(conn, &err);
        }
        self.acknowledge(conn, frame.receipt())
    }

    /// COMMIT: replay the buffered frames in insertion order.
    pub async fn commit(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(tx_id) = frame.transaction() else {
            return self.error_and_close(conn, "missing transaction header in COMMIT", Some(&frame));
        };
        let tx = match self.transactions.take(conn.id(), tx_id) {
            Ok(tx) => tx,
            Err(err) => return self.transaction_failure(conn, &err),
        };
        self.replay(conn, tx).await;
        self.acknowledge(conn, frame.receipt())
    }

    /// ABORT: discard the buffered frames.
    pub async fn abort(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(tx_id) = frame.transaction() else {
            return self.error_and_close(conn, "missing transaction header in ABORT", Some(&frame));
        };
        if let Err(err) = self.transactions.abort(conn.id(), tx_id) {
            return self.transaction_failure(conn, &err);
        }
        self.acknowledge(conn, frame.receipt())
    }

    /// ACK: apply now or defer into the named transaction.
    pub async fn ack(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(ack_id) = frame.id().map(str::to_string) else {
            return self.error_and_close(conn, "missing id header in ACK", Some(&frame));
        };
        let receipt = frame.receipt().map(str::to_string);
        if let Some(tx_id) = frame.transaction().map(str::to_string) {
            let result = self.transactions.add_frame(
                conn.id(),
                &tx_id,
                frame,
                self.options.max_frames_in_transaction,
            );
            if let Err(err) = result {
                return self.transaction_failure(conn, &err);
            }
        } else {
            self.apply_ack(conn.id(), &ack_id);
        }
        self.acknowledge(conn, receipt.as_deref())
    }

    /// NACK: apply now or defer into the named transaction.
    pub async fn nack(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let Some(ack_id) = frame.id().map(str::to_string) else {
            return self.error_and_close(conn, "missing id header in NACK", Some(&frame));
        };
        let receipt = frame.receipt().map(str::to_string);
        if let Some(tx_id) = frame.transaction().map(str::to_string) {
            let result = self.transactions.add_frame(
                conn.id(),
                &tx_id,
                frame,
                self.options.max_frames_in_transaction,
            );
            if let Err(err) = result {
                return self.transaction_failure(conn, &err);
            }
        } else {
            self.apply_nack(conn.id(), &ack_id).await;
        }
        self.acknowledge(conn, receipt.as_deref())
    }

    /// DISCONNECT: confirm the receipt, then close.
    pub async fn disconnect(&self, conn: &Connection, frame: Frame) -> SessionAction {
        let _ = self.acknowledge(conn, frame.receipt());
        SessionAction::Close
    }

    /// Tear down everything a connection owns. Safe to call on any path out
    /// of the session loop: client DISCONNECT, transport drop, or a
    /// server-initiated close.
    pub fn teardown(&self, conn: &Connection) {
        conn.mark_closed();
        self.destinations.remove_connection(conn.id());
        let dropped = self.transactions.remove_connection(conn.id());
        if dropped > 0 {
            tracing::debug!("{} aborted {} open transaction(s) on close", conn.id(), dropped);
        }
        if let Some(hook) = &self.hooks.on_close {
            hook(conn.id());
        }
        tracing::info!("{} closed", conn.id());
    }

    /// Replay a committed transaction, yielding between chunks so other
    /// connections make progress during large commits. Ordering inside the
    /// transaction is preserved.
    async fn replay(&self, conn: &Connection, tx: Transaction) {
        let chunk = self.options.transaction_chunk_size;
        for (index, frame) in tx.into_frames().into_iter().enumerate() {
            if chunk > 0 && index > 0 && index % chunk == 0 {
                tokio::task::yield_now().await;
            }
            match frame.command {
                Command::Send => {
                    if let Some(destination) = frame.destination().map(str::to_string) {
                        self.destinations.dispatch(&frame, &destination).await;
                    }
                }
                Command::Ack => {
                    if let Some(ack_id) = frame.id() {
                        self.apply_ack(conn.id(), ack_id);
                    }
                }
                Command::Nack => {
                    if let Some(ack_id) = frame.id() {
                        self.apply_nack(conn.id(), ack_id).await;
                    }
                }
                other => {
                    tracing::warn!("skipping {} frame buffered in transaction", other);
                }
            }
        }
    }

    /// Unknown ack ids are ignored: the delivery may have been released by a
    /// cumulative ack or by the subscription going away.
    fn apply_ack(&self, conn: ConnectionId, ack_id: &str) {
        match self.destinations.ack(conn, ack_id) {
            Some(outcome) => match &self.hooks.on_ack {
                Some(hook) => hook(&outcome),
                None => tracing::info!(
                    "{} acknowledged {} message(s) on {}",
                    conn,
                    outcome.frames.len(),
                    outcome.destination
                ),
            },
            None => tracing::debug!("{} acked unknown id {}, ignoring", conn, ack_id),
        }
    }

    async fn apply_nack(&self, conn: ConnectionId, ack_id: &str) {
        match self.destinations.nack(conn, ack_id).await {
            Some(outcome) => match &self.hooks.on_nack {
                Some(hook) => hook(&outcome),
                None => tracing::warn!(
                    "{} rejected {} message(s) on {}",
                    conn,
                    outcome.frames.len(),
                    outcome.destination
                ),
            },
            None => tracing::debug!("{} nacked unknown id {}, ignoring", conn, ack_id),
        }
    }

    /// Emit the RECEIPT demanded by a `receipt` header, after the command's
    /// side effects are visible.
    fn acknowledge(&self, conn: &Connection, receipt: Option<&str>) -> SessionAction {
        if let Some(receipt_id) = receipt {
            if conn.send(Frame::receipt_for(receipt_id)).is_err() {
                return SessionAction::Close;
            }
        }
        SessionAction::Continue
    }

    /// Any transaction error also destroys every transaction of the
    /// offending connection before the ERROR/close.
    fn transaction_failure(&self, conn: &Connection, err: &TransactionError) -> SessionAction {
        let dropped = self.transactions.remove_connection(conn.id());
        tracing::warn!(
            "{} transaction failure ({err}), dropped {} open transaction(s)",
            conn.id(),
            dropped
        );
        self.error_and_close(conn, &err.to_string(), None)
    }

    /// Emit an ERROR frame and ask for teardown. Every protocol error is
    /// terminal for the connection.
    pub fn error_and_close(
        &self,
        conn: &Connection,
        message: &str,
        offending: Option<&Frame>,
    ) -> SessionAction {
        let details = offending
            .map(|frame| format!("The offending frame:\n-----\n{frame}-----\n"))
            .unwrap_or_default();
        tracing::warn!("{} protocol error: {}", conn.id(), message);
        let _ = conn.send(Frame::error(message, &details));
        SessionAction::Close
    }
}
