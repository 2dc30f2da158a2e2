#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::similar_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

//! stompd - unified CLI entrypoint.
//!
//! Usage:
//!   stompd start --config config/stompd.toml
//!   stompd send /queue/orders "hello"
//!   stompd listen /topic/news

use anyhow::Result;
use clap::Parser;
use stompd::cli::commands::{run_listen, run_send, run_start};
use stompd::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::Send(args) => run_send(args).await,
        Commands::Listen(args) => run_listen(args).await,
    }
}
