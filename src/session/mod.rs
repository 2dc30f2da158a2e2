//! Per-connection session machinery: connection handles, the command
//! handler seam, and the engine implementing the standard semantics.

pub mod connection;
pub mod engine;
pub mod handler;

pub use connection::{Connection, ConnectionId, SessionPhase};
pub use engine::{ServerHooks, SessionAction, StompServer};
pub use handler::{DefaultHandler, HandlerFuture, StompHandler};
