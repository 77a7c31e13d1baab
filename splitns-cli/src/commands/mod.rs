use crate::cli::Commands;
use anyhow::Result;
use splitns_reconcile::Reconciler;

pub mod cleanup;
pub mod setup;
pub mod status;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands, reconciler: &Reconciler) -> Result<()> {
    match command {
        Commands::Setup => setup::execute(reconciler).await,
        Commands::Cleanup => cleanup::execute(reconciler).await,
        Commands::Status { json } => status::execute(reconciler, json).await,
    }
}
