//! Courier - command-line front end for the offline-first chat core.
//!
//! The `run` command opens an interactive chat session against an
//! in-process message log; the remaining commands inspect and maintain the
//! local queue, cache and configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod commands;

/// Courier - offline-first chat delivery
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Offline-first chat delivery with a durable outgoing queue", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive chat session
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Sender id for messages typed in this session
        #[arg(long, default_value = "local")]
        user: String,

        /// Display name for messages typed in this session
        #[arg(long, default_value = "Me")]
        name: String,
    },

    /// List messages waiting in the outgoing queue
    Queue,

    /// Show the cached message snapshot
    Cache {
        /// Only show the newest N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Clear the local queue and cache
    Clear {
        /// Also drop queued messages that were never delivered
        #[arg(long)]
        include_queue: bool,
    },

    /// Show paths and local store status
    Status,

    /// Show or modify configuration
    Config {
        /// Key to get or set
        key: Option<String>,
        /// Value to set
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { config, user, name } => {
            info!("Starting chat session...");
            commands::run::execute(config, user, name).await
        }
        Commands::Queue => commands::queue::execute().await,
        Commands::Cache { limit } => commands::cache::execute(limit).await,
        Commands::Clear { include_queue } => commands::clear::execute(include_queue).await,
        Commands::Status => commands::status::execute().await,
        Commands::Config { key, value } => commands::config::execute(key, value).await,
    }
}
