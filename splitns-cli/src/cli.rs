//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "splitns")]
#[command(about = "Route a network namespace around the VPN", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON profile overriding the default topology
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log mutating commands instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the namespace and its routing, NAT and DNS
    Setup,

    /// Remove everything setup created
    Cleanup,

    /// Report what is in place and probe connectivity
    Status {
        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Name used in privilege errors
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Cleanup => "cleanup",
            Self::Status { .. } => "status",
        }
    }
}
