//! Cleanup command implementation

use anyhow::{Context, Result};
use splitns_reconcile::Reconciler;

pub async fn execute(reconciler: &Reconciler) -> Result<()> {
    let namespace = &reconciler.config().namespace;

    let reports = reconciler
        .cleanup()
        .await
        .with_context(|| format!("Failed to clean up namespace '{namespace}'"))?;

    let removed = reports.iter().filter(|r| r.outcome.changed()).count();
    tracing::debug!(steps = reports.len(), removed, "Cleanup finished");

    Ok(())
}
