//! Destination registry and dispatch.
//!
//! Destinations are created lazily on first SUBSCRIBE or SEND and keyed by
//! name. A *topic* fans every SEND out to all current subscribers; a *queue*
//! delivers each SEND to exactly one subscriber, round-robin, and
//! re-dispatches negatively acknowledged messages.
//!
//! Locking: each destination guards its subscription list and cursor with a
//! mutex held only for snapshots and list mutation. Writes to subscriber
//! connections happen after the lock is released, so one slow consumer never
//! stalls dispatch to its siblings.

use crate::messaging::subscriptions::{PendingDelivery, Subscription};
use crate::protocol::frame::headers;
use crate::protocol::Frame;
use crate::session::connection::{Connection, ConnectionId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Topic,
    Queue,
}

impl DestinationKind {
    /// Infer the kind from a destination name: `/queue` names load-balance,
    /// everything else fans out.
    pub fn for_name(name: &str) -> Self {
        if name == "/queue" || name.starts_with("/queue/") {
            DestinationKind::Queue
        } else {
            DestinationKind::Topic
        }
    }
}

#[derive(Debug, Default)]
struct DestinationState {
    subscriptions: Vec<Subscription>,
    cursor: usize,
}

/// Result of applying an ACK or NACK: which subscription owned the id and
/// the MESSAGE frames it released.
#[derive(Debug)]
pub struct AckOutcome {
    pub destination: String,
    pub subscription_id: String,
    pub frames: Vec<Frame>,
}

#[derive(Debug)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
    state: Mutex<DestinationState>,
}

impl Destination {
    fn new(name: &str, kind: DestinationKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            state: Mutex::new(DestinationState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn subscribe(&self, subscription: Subscription) {
        self.state.lock().subscriptions.push(subscription);
    }

    pub fn unsubscribe(&self, conn: ConnectionId, id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|s| !(s.connection.id() == conn && s.id == id));
        state.subscriptions.len() < before
    }

    pub fn remove_connection(&self, conn: ConnectionId) -> usize {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.connection.id() != conn);
        before - state.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().subscriptions.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn has_subscription(&self, conn: ConnectionId, id: &str) -> bool {
        self.state
            .lock()
            .subscriptions
            .iter()
            .any(|s| s.connection.id() == conn && s.id == id)
    }

    /// Subscription ids held by a connection on this destination.
    pub fn subscription_ids(&self, conn: ConnectionId) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.connection.id() == conn)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Route a SEND frame to the current subscribers.
    pub async fn dispatch(&self, frame: &Frame) {
        let deliveries = {
            let mut state = self.state.lock();
            match self.kind {
                DestinationKind::Topic => state
                    .subscriptions
                    .iter_mut()
                    .map(|sub| stamp_delivery(frame, sub))
                    .collect(),
                DestinationKind::Queue => {
                    if state.subscriptions.is_empty() {
                        // No subscribers and no persistence: the message is dropped.
                        tracing::debug!("no subscriber on {}, dropping message", self.name);
                        Vec::new()
                    } else {
                        let idx = state.cursor % state.subscriptions.len();
                        state.cursor = state.cursor.wrapping_add(1);
                        let sub = &mut state.subscriptions[idx];
                        vec![stamp_delivery(frame, sub)]
                    }
                }
            }
        };
        write_deliveries(deliveries).await;
    }

    /// Apply an ACK for `ack_id` held by `conn`. Bookkeeping only; returns
    /// the released frames for the server's ack hook.
    pub fn ack(&self, conn: ConnectionId, ack_id: &str) -> Option<AckOutcome> {
        let mut state = self.state.lock();
        let sub = state
            .subscriptions
            .iter_mut()
            .find(|s| s.connection.id() == conn && s.owns_ack(ack_id))?;
        let subscription_id = sub.id.clone();
        let frames = sub
            .take_acked(ack_id)
            .into_iter()
            .map(|p| p.frame)
            .collect();
        Some(AckOutcome {
            destination: self.name.clone(),
            subscription_id,
            frames,
        })
    }

    /// Apply a NACK. On a queue every released message is re-dispatched
    /// round-robin, skipping the nacking subscriber when any other exists.
    pub async fn nack(&self, conn: ConnectionId, ack_id: &str) -> Option<AckOutcome> {
        let (outcome, redeliveries) = {
            let mut state = self.state.lock();
            let sub = state
                .subscriptions
                .iter_mut()
                .find(|s| s.connection.id() == conn && s.owns_ack(ack_id))?;
            let subscription_id = sub.id.clone();
            let released: Vec<PendingDelivery> = sub.take_acked(ack_id);
            let frames: Vec<Frame> = released.iter().map(|p| p.frame.clone()).collect();

            let mut redeliveries = Vec::new();
            if self.kind == DestinationKind::Queue {
                for pending in released {
                    if let Some(delivery) = pick_redelivery(&mut state, conn, &pending.frame) {
                        redeliveries.push(delivery);
                    }
                }
            }
            (
                AckOutcome {
                    destination: self.name.clone(),
                    subscription_id,
                    frames,
                },
                redeliveries,
            )
        };
        write_deliveries(redeliveries).await;
        Some(outcome)
    }
}

/// Build the per-subscriber MESSAGE for a SEND frame and record the pending
/// acknowledgement on the subscription.
fn stamp_delivery(send: &Frame, sub: &mut Subscription) -> (Connection, Frame) {
    let message_id = uuid::Uuid::new_v4().to_string();
    let ack_id = sub.ack_mode.needs_ack().then_some(message_id.as_str());
    let message = Frame::message(send, &sub.id, &message_id, ack_id);
    sub.track(&message_id, message.clone());
    (sub.connection.clone(), message)
}

/// Choose the next queue subscriber for a redelivered message, preferring
/// anyone other than the subscriber that nacked it.
fn pick_redelivery(
    state: &mut DestinationState,
    nacker: ConnectionId,
    original: &Frame,
) -> Option<(Connection, Frame)> {
    let len = state.subscriptions.len();
    if len == 0 {
        return None;
    }
    let mut idx = state.cursor % len;
    for _ in 0..len {
        if state.subscriptions[idx].connection.id() != nacker {
            break;
        }
        idx = (idx + 1) % len;
    }
    state.cursor = idx.wrapping_add(1);

    let sub = &mut state.subscriptions[idx];
    let message_id = uuid::Uuid::new_v4().to_string();
    let mut message = original.clone();
    message.headers.set(headers::SUBSCRIPTION, &sub.id);
    message.headers.set(headers::MESSAGE_ID, &message_id);
    if sub.ack_mode.needs_ack() {
        message.headers.set(headers::ACK, &message_id);
    } else {
        message.headers.remove(headers::ACK);
    }
    sub.track(&message_id, message.clone());
    Some((sub.connection.clone(), message))
}

async fn write_deliveries(deliveries: Vec<(Connection, Frame)>) {
    for (conn, message) in deliveries {
        // A failed write closes only that consumer; the sender is unaffected.
        if let Err(err) = conn.deliver(message).await {
            tracing::debug!("delivery to {} failed: {err}", conn.id());
        }
    }
}

/// Name-keyed destination registry shared by every connection.
#[derive(Debug)]
pub struct DestinationRegistry {
    destinations: RwLock<HashMap<String, Arc<Destination>>>,
    auto_gc: bool,
}

impl DestinationRegistry {
    pub fn new(auto_gc: bool) -> Self {
        Self {
            destinations: RwLock::new(HashMap::new()),
            auto_gc,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Destination>> {
        self.destinations.read().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<Destination> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut map = self.destinations.write();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Destination::new(name, DestinationKind::for_name(name))))
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.destinations.read().keys().cloned().collect()
    }

    /// Register a subscription; the (connection, id) uniqueness check has
    /// already been made by the handler. The map write lock is held across
    /// the insert so GC cannot drop the destination underneath us.
    pub fn subscribe(&self, subscription: Subscription) {
        let mut map = self.destinations.write();
        let name = subscription.destination.clone();
        let destination = map
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Destination::new(&name, DestinationKind::for_name(&name))))
            .clone();
        destination.subscribe(subscription);
    }

    /// Whether a subscription id is already live anywhere on a connection.
    pub fn id_in_use(&self, conn: ConnectionId, id: &str) -> bool {
        self.destinations
            .read()
            .values()
            .any(|d| d.has_subscription(conn, id))
    }

    pub fn unsubscribe(&self, conn: ConnectionId, id: &str) -> bool {
        let found = self
            .destinations
            .read()
            .values()
            .find(|d| d.has_subscription(conn, id))
            .cloned();
        match found {
            Some(destination) => {
                let removed = destination.unsubscribe(conn, id);
                self.collect(&destination);
                removed
            }
            None => false,
        }
    }

    /// Drop every subscription owned by a closing connection.
    pub fn remove_connection(&self, conn: ConnectionId) {
        let all: Vec<Arc<Destination>> = self.destinations.read().values().cloned().collect();
        for destination in all {
            if destination.remove_connection(conn) > 0 {
                self.collect(&destination);
            }
        }
    }

    /// Route a SEND frame, creating the destination when absent.
    pub async fn dispatch(&self, frame: &Frame, destination: &str) {
        let destination = self.get_or_create(destination);
        destination.dispatch(frame).await;
    }

    /// Locate and apply an ACK across all destinations.
    pub fn ack(&self, conn: ConnectionId, ack_id: &str) -> Option<AckOutcome> {
        let all: Vec<Arc<Destination>> = self.destinations.read().values().cloned().collect();
        all.iter().find_map(|d| d.ack(conn, ack_id))
    }

    /// Locate and apply a NACK across all destinations.
    pub async fn nack(&self, conn: ConnectionId, ack_id: &str) -> Option<AckOutcome> {
        let all: Vec<Arc<Destination>> = self.destinations.read().values().cloned().collect();
        for destination in all {
            if let Some(outcome) = destination.nack(conn, ack_id).await {
                return Some(outcome);
            }
        }
        None
    }

    /// Remove an emptied destination when auto-GC is enabled. The emptiness
    /// re-check under the write lock excludes racing subscribers.
    fn collect(&self, destination: &Arc<Destination>) {
        if !self.auto_gc {
            return;
        }
        let mut map = self.destinations.write();
        if destination.is_empty() {
            map.remove(destination.name());
        }
    }
}
