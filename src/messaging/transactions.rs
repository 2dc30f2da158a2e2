//! Client-scoped transactions.
//!
//! A transaction buffers SEND/ACK/NACK frames for one connection until
//! COMMIT replays them in insertion order or ABORT discards them. Buffers
//! are bounded by the server's `max_frames_in_transaction` option; the
//! manager is partitioned by connection, so a transaction id only has to be
//! unique per connection.

use crate::protocol::Frame;
use crate::session::connection::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Already existing transaction '{0}'")]
    AlreadyExists(String),
    #[error("Unknown transaction '{0}'")]
    Unknown(String),
    #[error("too many frames in transaction (max {0})")]
    TooManyFrames(i64),
}

/// One live transaction and its ordered frame buffer.
#[derive(Debug)]
pub struct Transaction {
    pub id: String,
    pub connection: ConnectionId,
    frames: Vec<Frame>,
}

impl Transaction {
    fn new(id: &str, connection: ConnectionId) -> Self {
        Self {
            id: id.to_string(),
            connection,
            frames: Vec::new(),
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// All live transactions of one server instance, keyed by (connection, id).
#[derive(Debug, Default)]
pub struct TransactionManager {
    transactions: Mutex<HashMap<(ConnectionId, String), Transaction>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, conn: ConnectionId, id: &str) -> Result<(), TransactionError> {
        let mut map = self.transactions.lock();
        let key = (conn, id.to_string());
        if map.contains_key(&key) {
            return Err(TransactionError::AlreadyExists(id.to_string()));
        }
        map.insert(key, Transaction::new(id, conn));
        Ok(())
    }

    /// Append a frame to a live transaction. `max_frames <= 0` disables the
    /// size check.
    pub fn add_frame(
        &self,
        conn: ConnectionId,
        id: &str,
        frame: Frame,
        max_frames: i64,
    ) -> Result<(), TransactionError> {
        let mut map = self.transactions.lock();
        let tx = map
            .get_mut(&(conn, id.to_string()))
            .ok_or_else(|| TransactionError::Unknown(id.to_string()))?;
        if max_frames > 0 && tx.frames.len() as i64 >= max_frames {
            return Err(TransactionError::TooManyFrames(max_frames));
        }
        tx.frames.push(frame);
        Ok(())
    }

    /// Take a transaction out of the registry for COMMIT replay.
    pub fn take(&self, conn: ConnectionId, id: &str) -> Result<Transaction, TransactionError> {
        self.transactions
            .lock()
            .remove(&(conn, id.to_string()))
            .ok_or_else(|| TransactionError::Unknown(id.to_string()))
    }

    /// Drop a transaction without replaying it (ABORT).
    pub fn abort(&self, conn: ConnectionId, id: &str) -> Result<(), TransactionError> {
        self.transactions
            .lock()
            .remove(&(conn, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| TransactionError::Unknown(id.to_string()))
    }

    /// Drop every transaction of a connection; used on teardown and after
    /// any transaction error on that connection.
    pub fn remove_connection(&self, conn: ConnectionId) -> usize {
        let mut map = self.transactions.lock();
        let before = map.len();
        map.retain(|(owner, _), _| *owner != conn);
        before - map.len()
    }

    /// Live transaction count across all connections of this server.
    pub fn count(&self) -> usize {
        self.transactions.lock().len()
    }
}
