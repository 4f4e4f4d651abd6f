//! RowSync CLI
//!
//! Runs a sync server from the command line.
//!
//! # Commands
//!
//! - `serve` - Serve pull/push over HTTP with the demo schema
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// RowSync sync server.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve pull and push over HTTP from an in-memory store
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "ROWSYNC_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Maximum mutations accepted in one push
        #[arg(long, env = "ROWSYNC_MAX_PUSH_BATCH", default_value = "100")]
        max_push_batch: usize,

        /// Rows fetched per store round trip while building a patch
        #[arg(long, env = "ROWSYNC_FETCH_CHUNK_SIZE", default_value = "500")]
        fetch_chunk_size: usize,

        /// CVR versions kept per client group
        #[arg(long, env = "ROWSYNC_CVR_RETENTION", default_value = "10")]
        cvr_retention: u64,

        /// Hours a client group may stay idle before it is swept
        #[arg(long, env = "ROWSYNC_CLIENT_RETENTION_HOURS", default_value = "336")]
        client_retention_hours: u64,

        /// Seconds between retention sweeps
        #[arg(long, env = "ROWSYNC_SWEEP_INTERVAL_SECS", default_value = "3600")]
        sweep_interval_secs: u64,

        /// Maximum transaction attempts before giving up
        #[arg(long, env = "ROWSYNC_MAX_ATTEMPTS", default_value = "5")]
        max_attempts: u32,

        /// Start with an empty store instead of the demo data
        #[arg(long)]
        no_seed: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            max_push_batch,
            fetch_chunk_size,
            cvr_retention,
            client_retention_hours,
            sweep_interval_secs,
            max_attempts,
            no_seed,
        } => {
            let options = commands::serve::ServeOptions {
                bind,
                max_push_batch,
                fetch_chunk_size,
                cvr_retention,
                client_retention_hours,
                sweep_interval_secs,
                max_attempts,
                seed: !no_seed,
            };
            commands::serve::run(options).await?;
        }
        Commands::Version => {
            println!("RowSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
