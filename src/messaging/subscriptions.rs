//! Subscription records and their pending-acknowledgement queues.

use crate::protocol::Frame;
use crate::session::connection::Connection;
use std::collections::VecDeque;

/// Acknowledgement discipline requested by a SUBSCRIBE frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// No acknowledgement expected; deliveries are not tracked.
    Auto,
    /// Cumulative: acking a message acks everything delivered before it.
    Client,
    /// Per-message acknowledgement.
    ClientIndividual,
}

impl AckMode {
    /// Parse the `ack` header; absent or unrecognized values mean `auto`.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("client") => AckMode::Client,
            Some("client-individual") => AckMode::ClientIndividual,
            _ => AckMode::Auto,
        }
    }

    pub fn needs_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

/// One delivered-but-unacknowledged MESSAGE. The frame is retained so a
/// queue NACK can re-dispatch it.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub ack_id: String,
    pub frame: Frame,
}

/// A live interest by one connection in one destination.
///
/// Invariant: at most one live subscription per (connection, id) pair,
/// enforced by the registry before insertion.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub connection: Connection,
    pub destination: String,
    pub ack_mode: AckMode,
    pending: VecDeque<PendingDelivery>,
}

impl Subscription {
    pub fn new(id: &str, connection: Connection, destination: &str, ack_mode: AckMode) -> Self {
        Self {
            id: id.to_string(),
            connection,
            destination: destination.to_string(),
            ack_mode,
            pending: VecDeque::new(),
        }
    }

    /// Record a delivery awaiting acknowledgement. No-op in auto mode.
    pub fn track(&mut self, ack_id: &str, frame: Frame) {
        if self.ack_mode.needs_ack() {
            self.pending.push_back(PendingDelivery {
                ack_id: ack_id.to_string(),
                frame,
            });
        }
    }

    pub fn owns_ack(&self, ack_id: &str) -> bool {
        self.pending.iter().any(|p| p.ack_id == ack_id)
    }

    /// Remove deliveries for `ack_id` according to the subscription's mode:
    /// `client` takes everything up to and including the id,
    /// `client-individual` takes only the exact entry.
    pub fn take_acked(&mut self, ack_id: &str) -> Vec<PendingDelivery> {
        let Some(idx) = self.pending.iter().position(|p| p.ack_id == ack_id) else {
            return Vec::new();
        };
        match self.ack_mode {
            AckMode::ClientIndividual => self.pending.remove(idx).into_iter().collect(),
            _ => self.pending.drain(..=idx).collect(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Frame};
    use crate::session::connection::{Connection, ConnectionId};
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn subscription(mode: AckMode) -> Subscription {
        let (tx, _rx) = mpsc::channel(8);
        // Receiver dropped on purpose; these tests never send.
        let conn = Connection::new(ConnectionId(7), None, tx, Instant::now());
        Subscription::new("sub-0", conn, "/queue/q", mode)
    }

    fn delivery(sub: &mut Subscription, ack_id: &str) {
        sub.track(ack_id, Frame::new(Command::Message));
    }

    #[test]
    fn test_ack_mode_parsing() {
        assert_eq!(AckMode::from_header(None), AckMode::Auto);
        assert_eq!(AckMode::from_header(Some("auto")), AckMode::Auto);
        assert_eq!(AckMode::from_header(Some("client")), AckMode::Client);
        assert_eq!(
            AckMode::from_header(Some("client-individual")),
            AckMode::ClientIndividual
        );
        assert_eq!(AckMode::from_header(Some("bogus")), AckMode::Auto);
    }

    #[test]
    fn test_auto_mode_tracks_nothing() {
        let mut sub = subscription(AckMode::Auto);
        delivery(&mut sub, "m1");
        assert_eq!(sub.pending_len(), 0);
    }

    #[test]
    fn test_cumulative_ack() {
        let mut sub = subscription(AckMode::Client);
        delivery(&mut sub, "m1");
        delivery(&mut sub, "m2");
        delivery(&mut sub, "m3");

        let acked = sub.take_acked("m2");
        assert_eq!(
            acked.iter().map(|p| p.ack_id.as_str()).collect::<Vec<_>>(),
            ["m1", "m2"]
        );
        assert_eq!(sub.pending_len(), 1);
        assert!(sub.owns_ack("m3"));
    }

    #[test]
    fn test_individual_ack() {
        let mut sub = subscription(AckMode::ClientIndividual);
        delivery(&mut sub, "m1");
        delivery(&mut sub, "m2");
        delivery(&mut sub, "m3");

        let acked = sub.take_acked("m2");
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].ack_id, "m2");
        assert_eq!(sub.pending_len(), 2);
        assert!(sub.owns_ack("m1"));
        assert!(sub.owns_ack("m3"));
    }

    #[test]
    fn test_unknown_ack_id() {
        let mut sub = subscription(AckMode::Client);
        delivery(&mut sub, "m1");
        assert!(sub.take_acked("nope").is_empty());
        assert_eq!(sub.pending_len(), 1);
    }
}
