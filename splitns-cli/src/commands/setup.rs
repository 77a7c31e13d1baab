//! Setup command implementation

use anyhow::{Context, Result};
use splitns_reconcile::Reconciler;

pub async fn execute(reconciler: &Reconciler) -> Result<()> {
    let namespace = &reconciler.config().namespace;

    let reports = reconciler
        .setup()
        .await
        .with_context(|| format!("Failed to set up namespace '{namespace}'"))?;

    let changed = reports.iter().filter(|r| r.outcome.changed()).count();
    tracing::debug!(steps = reports.len(), changed, "Setup finished");

    Ok(())
}
