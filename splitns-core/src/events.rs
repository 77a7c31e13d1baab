//! Reconciliation reports with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NamespaceName, Outcome, Step};

/// What happened to one step during `setup` or `cleanup`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step that ran
    pub step: Step,
    /// How it ended
    pub outcome: Outcome,
}

impl StepReport {
    /// Create a new report
    #[must_use]
    pub const fn new(step: Step, outcome: Outcome) -> Self {
        Self { step, outcome }
    }

    /// Emit structured tracing event
    ///
    /// Tolerated primitive failures are warnings, everything else is info.
    pub fn emit_trace(&self) {
        if self.outcome.is_tolerated() {
            tracing::warn!(
                step = %self.step,
                outcome = %self.outcome,
                "Primitive reported existing state, continuing"
            );
        } else {
            tracing::info!(
                step = %self.step,
                outcome = %self.outcome,
                changed = self.outcome.changed(),
                "Step complete"
            );
        }
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.outcome)
    }
}

/// Result of a read-only `status` run
///
/// Checks after `namespace_present` are `None` when the namespace is absent,
/// because status stops at the first check in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Namespace that was inspected
    pub namespace: NamespaceName,
    /// Namespace is listed by the kernel
    pub namespace_present: bool,
    /// Host end of the veth pair exists
    pub veth_present: Option<bool>,
    /// Source policy rule is installed
    pub policy_rule_present: Option<bool>,
    /// NAT masquerade rule is installed
    pub masquerade_present: Option<bool>,
    /// Ping from inside the namespace succeeded
    pub connectivity: Option<bool>,
}

impl StatusReport {
    /// Report for a namespace that does not exist
    #[must_use]
    pub const fn absent(namespace: NamespaceName) -> Self {
        Self {
            namespace,
            namespace_present: false,
            veth_present: None,
            policy_rule_present: None,
            masquerade_present: None,
            connectivity: None,
        }
    }

    /// All four resources present; connectivity is judged separately
    #[must_use]
    pub fn resources_present(&self) -> bool {
        self.namespace_present
            && self.veth_present == Some(true)
            && self.policy_rule_present == Some(true)
            && self.masquerade_present == Some(true)
    }

    /// Emit one structured tracing event per check
    pub fn emit_trace(&self) {
        if !self.namespace_present {
            tracing::warn!(namespace = %self.namespace, "Namespace does not exist");
            return;
        }

        tracing::info!(namespace = %self.namespace, "Namespace exists");

        let checks = [
            ("veth pair", self.veth_present),
            ("policy routing rule", self.policy_rule_present),
            ("NAT masquerade rule", self.masquerade_present),
            ("connectivity", self.connectivity),
        ];

        for (check, result) in checks {
            match result {
                Some(true) => tracing::info!(namespace = %self.namespace, check, "OK"),
                Some(false) => tracing::warn!(namespace = %self.namespace, check, "FAILED"),
                None => tracing::debug!(namespace = %self.namespace, check, "not checked"),
            }
        }
    }
}
