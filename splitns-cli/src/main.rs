//! splitns
//!
//! Keeps a named network namespace routed through the physical uplink while
//! the rest of the host uses a VPN.

use anyhow::{Context, Result};
use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::Level;

mod cli;
mod commands;

use cli::Cli;
use splitns_net::{NetworkBackend, SystemBackend};
use splitns_reconcile::{Reconciler, TopologyConfig};

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Nothing touches the host before this
    splitns_security::require_root(cli.command.name())
        .context("splitns must run as root, try: sudo splitns")?;

    let config = match &cli.config {
        Some(path) => TopologyConfig::from_json_file(path)
            .with_context(|| format!("Invalid profile {}", path.display()))?,
        None => TopologyConfig::default(),
    };

    let backend: Arc<dyn NetworkBackend> = if cli.dry_run {
        tracing::info!("Dry run: mutating commands will only be logged");
        Arc::new(SystemBackend::dry_run().context("Failed to initialise backend")?)
    } else {
        Arc::new(SystemBackend::new().context("Failed to initialise backend")?)
    };

    let reconciler = Reconciler::new(config, backend).context("Invalid topology")?;

    commands::dispatch(cli.command, &reconciler).await
}
