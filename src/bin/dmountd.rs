//! dmount daemon - serves mounted CSV datasets over TCP, HTTP and WebSocket
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (./host, ports 4123/12345/8923); a secret is required
//! DMOUNT_SECRET=changeme dmountd start
//!
//! # Start from a config file and write data.csv into a new sandbox
//! dmountd start --config dmountd.toml --seed-sample
//!
//! # Validate configuration and exit
//! dmountd check-config --config dmountd.toml
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dmount_core::{seed_sample_dataset, Sandbox};
use dmountd::{Daemon, DaemonConfig};

/// dmount daemon - CSV mount registry with authenticated sessions
#[derive(Parser, Debug)]
#[command(name = "dmountd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the foreground
    Start {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the sample dataset into the sandbox if it is missing.
        ///
        /// Seeding is opt-in: without this flag the sandbox is left as found.
        /// No config.json is ever written; settings come from TOML and the
        /// environment.
        #[arg(long)]
        seed_sample: bool,
    },
    /// Load and validate the configuration, then exit
    CheckConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        config: None,
        seed_sample: false,
    });

    match command {
        Command::Start {
            config,
            seed_sample,
        } => run_daemon(config, seed_sample),
        Command::CheckConfig { config } => {
            let config = DaemonConfig::load(config.as_deref()).context("Invalid configuration")?;
            println!("Configuration OK");
            println!("  sandbox:  {}", config.sandbox_root.display());
            println!("  tcp:      {}", config.tcp_addr()?);
            println!("  http:     {}", config.http_addr()?);
            println!("  row feed: {}", config.row_feed_addr()?);
            println!("  peers:    {}", config.peers.len());
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_daemon(config_path: Option<PathBuf>, seed_sample: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dmountd=info".parse()?)
                .add_directive("dmount_core=info".parse()?)
                .add_directive("dmount_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "dmount daemon starting"
    );

    let config = DaemonConfig::load(config_path.as_deref()).context("Invalid configuration")?;

    if seed_sample {
        let sandbox = Sandbox::prepare(&config.sandbox_root).context("Failed to prepare sandbox")?;
        seed_sample_dataset(sandbox.root()).context("Failed to write sample dataset")?;
    }

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let daemon = Daemon::bind(&config, cancel_token).await?;

    if let Err(e) = daemon.run().await {
        error!(error = %e, "Daemon error");
        return Err(e.into());
    }

    info!("dmount daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
