//! Status command implementation

use anyhow::{Context, Result};
use splitns_core::StatusReport;
use splitns_reconcile::Reconciler;

pub async fn execute(reconciler: &Reconciler, json: bool) -> Result<()> {
    let report = reconciler
        .status()
        .await
        .context("Failed to query namespace status")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to render status report")?;
        println!("{rendered}");
    }

    verdict(&report)
}

/// Only a missing namespace is a failing status; failed checks are warnings
fn verdict(report: &StatusReport) -> Result<()> {
    if !report.namespace_present {
        anyhow::bail!("Namespace '{}' does not exist", report.namespace);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitns_core::NamespaceName;

    fn home() -> NamespaceName {
        NamespaceName::new("home").unwrap()
    }

    #[test]
    fn test_absent_namespace_fails() {
        let err = verdict(&StatusReport::absent(home())).unwrap_err();
        assert_eq!(err.to_string(), "Namespace 'home' does not exist");
    }

    #[test]
    fn test_failed_checks_still_succeed() {
        let report = StatusReport {
            namespace: home(),
            namespace_present: true,
            veth_present: Some(false),
            policy_rule_present: Some(true),
            masquerade_present: Some(false),
            connectivity: Some(false),
        };

        assert!(verdict(&report).is_ok());
    }
}
