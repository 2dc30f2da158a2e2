//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// stompd - STOMP 1.2 message broker.
#[derive(Parser)]
#[command(name = "stompd")]
#[command(version)]
#[command(about = "stompd STOMP broker and client utilities")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the stompd broker
    Start(StartArgs),

    /// Send messages to a destination (kcat-style)
    Send(SendArgs),

    /// Subscribe to a destination and stream messages to stdout (kcat-style)
    Listen(ListenArgs),
}

// -----------------------------------------------------------------------------
// Start command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/stompd.toml")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Send / Listen commands (simple STOMP client)
// -----------------------------------------------------------------------------

/// Connection arguments shared by the client commands.
#[derive(Args, Clone)]
pub struct BrokerArgs {
    /// Broker hostname or IP
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Broker port
    #[arg(long, default_value_t = 61613)]
    pub port: u16,

    /// Login for secured brokers
    #[arg(long)]
    pub login: Option<String>,

    /// Passcode for secured brokers
    #[arg(long)]
    pub passcode: Option<String>,
}

#[derive(Args)]
pub struct SendArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Destination to send to (e.g. /queue/orders or /topic/news)
    pub destination: String,

    /// Message bodies; stdin lines are sent when none are given
    pub body: Vec<String>,

    /// Wrap all sends in a transaction with this id
    #[arg(long)]
    pub transaction: Option<String>,

    /// Ask the broker for a receipt per SEND and wait for it
    #[arg(long)]
    pub receipt: bool,
}

#[derive(Args)]
pub struct ListenArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Destination to subscribe to
    pub destination: String,

    /// Ack mode: auto, client, or client-individual
    #[arg(long, default_value = "auto")]
    pub ack: String,

    /// Acknowledge each message as it arrives (non-auto modes)
    #[arg(long)]
    pub ack_each: bool,
}
