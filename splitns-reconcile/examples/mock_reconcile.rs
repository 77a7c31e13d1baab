//! Setup, status and cleanup against the mock backend

use std::sync::Arc;
use splitns_net::{MockBackend, NetworkBackend};
use splitns_reconcile::{Reconciler, TopologyConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Reconciling against MockBackend (host untouched)\n");

    let backend = MockBackend::new();
    let shared: Arc<dyn NetworkBackend> = Arc::new(backend.clone());
    let reconciler = Reconciler::new(TopologyConfig::default(), shared)?;

    for report in reconciler.setup().await? {
        println!("  setup    {report}");
    }

    // Second run only re-applies the unguarded steps
    let rerun = reconciler.setup().await?;
    let changed = rerun.iter().filter(|r| r.outcome.changed()).count();
    println!("\nSecond setup changed {changed} of {} steps", rerun.len());

    let status = reconciler.status().await?;
    println!("\n{}", serde_json::to_string_pretty(&status)?);

    for report in reconciler.cleanup().await? {
        println!("  cleanup  {report}");
    }

    println!("\nFirewall rules left behind:");
    for rule in backend.firewall_rules().await {
        println!("  {rule}");
    }
    println!("Backend calls: {}", backend.mutation_count().await);

    Ok(())
}
