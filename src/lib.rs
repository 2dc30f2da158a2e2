#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Variable naming: domain terms often similar
#![allow(clippy::similar_names)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Control flow style
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match_else)]
#![allow(clippy::match_same_arms)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
// Iteration style
#![allow(clippy::explicit_iter_loop)]
// Explicit returns
#![allow(clippy::needless_return)]
// Large futures are expected in the session loop
#![allow(clippy::large_futures)]

//! stompd - STOMP 1.2 message broker.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::options` - Resolved server options
//! - `core::runtime` - Broker runtime orchestration
//! - `core::time` - Deterministic time utilities
//!
//! ## Protocol
//! - `protocol::frame` - Frame model and header helpers
//! - `protocol::codec` - Byte-level frame reader/writer
//! - `protocol::heartbeat` - Heart-beat negotiation
//!
//! ## Messaging
//! - `messaging::destinations` - Destination registry, topic and queue dispatch
//! - `messaging::subscriptions` - Subscription records and pending acks
//! - `messaging::transactions` - Client-scoped transaction buffers
//!
//! ## Session
//! - `session::connection` - Connection handles and session state
//! - `session::handler` - Per-command handler seam
//! - `session::engine` - Standard command semantics
//!
//! ## Networking
//! - `net::listener` - TCP listener and session loop
//! - `net::security` - Authentication providers
//!
//! ## Operations
//! - `ops::telemetry` - Logging setup
//!
//! ## CLI
//! - `cli` - Broker and client commands

// Core infrastructure
pub mod core;

// Wire protocol
pub mod protocol;

// Messaging
pub mod messaging;

// Session engine
pub mod session;

// Networking
pub mod net;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, options, runtime, time};
pub use messaging::{destinations, subscriptions, transactions};
pub use net::{listener, security};
pub use protocol::{codec, frame, heartbeat};
pub use session::{connection, engine, handler};

pub use self::core::config::Config;
pub use self::core::options::ServerOptions;
pub use session::engine::StompServer;
pub use session::handler::{DefaultHandler, StompHandler};
