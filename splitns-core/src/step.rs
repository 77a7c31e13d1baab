//! Reconciliation steps and their typed outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// One idempotent unit of host state managed by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Named network namespace
    Namespace,
    /// Loopback link inside the namespace
    Loopback,
    /// Veth pair, host end in the root namespace, peer in the target namespace
    VethPair,
    /// Address on the host end
    HostAddress,
    /// Host end brought up
    HostLinkUp,
    /// Address on the namespace end
    NamespaceAddress,
    /// Namespace end brought up
    NamespaceLinkUp,
    /// Default route inside the namespace via the host end
    DefaultRoute,
    /// `from <namespace ip> lookup main` policy rule
    PolicyRule,
    /// NAT masquerade for the namespace source address
    Masquerade,
    /// Shared `ESTABLISHED,RELATED` forward accept
    ForwardEstablished,
    /// Forward accept for the namespace source address
    ForwardNamespace,
    /// `/etc/netns/<name>/resolv.conf`
    DnsConfig,
}

impl Step {
    /// Order in which `setup` converges the host.
    ///
    /// Each step only depends on steps before it.
    pub const SETUP_ORDER: [Self; 13] = [
        Self::Namespace,
        Self::Loopback,
        Self::VethPair,
        Self::HostAddress,
        Self::HostLinkUp,
        Self::NamespaceAddress,
        Self::NamespaceLinkUp,
        Self::DefaultRoute,
        Self::PolicyRule,
        Self::Masquerade,
        Self::ForwardEstablished,
        Self::ForwardNamespace,
        Self::DnsConfig,
    ];

    /// Order in which `cleanup` tears the host down.
    ///
    /// Addresses, routes and link state disappear with the veth pair and the
    /// namespace. [`Step::ForwardEstablished`] is shared with other tools and
    /// is never removed.
    pub const CLEANUP_ORDER: [Self; 6] = [
        Self::Masquerade,
        Self::ForwardNamespace,
        Self::PolicyRule,
        Self::VethPair,
        Self::Namespace,
        Self::DnsConfig,
    ];

    /// Whether other consumers on the host may rely on this resource
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::ForwardEstablished)
    }

    /// Short, stable identifier used in logs and JSON
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Loopback => "loopback",
            Self::VethPair => "veth_pair",
            Self::HostAddress => "host_address",
            Self::HostLinkUp => "host_link_up",
            Self::NamespaceAddress => "namespace_address",
            Self::NamespaceLinkUp => "namespace_link_up",
            Self::DefaultRoute => "default_route",
            Self::PolicyRule => "policy_rule",
            Self::Masquerade => "masquerade",
            Self::ForwardEstablished => "forward_established",
            Self::ForwardNamespace => "forward_namespace",
            Self::DnsConfig => "dns_config",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single ensure/remove against the host
///
/// Failures are not an outcome: they come back as `Err` and abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Resource was absent and has been created
    Created,
    /// Unguarded idempotent action was performed (e.g. link up)
    Applied,
    /// Predicate found the desired state already in place; nothing was run
    Unchanged,
    /// Add was attempted and the primitive reported the resource already exists
    AlreadyPresent,
    /// Resource was present and has been removed
    Removed,
    /// Delete was attempted and the primitive reported the resource missing
    AlreadyAbsent,
}

impl Outcome {
    /// Whether the host was modified
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Created | Self::Applied | Self::Removed)
    }

    /// Whether a primitive failure was downgraded to reach this outcome
    #[must_use]
    pub const fn is_tolerated(self) -> bool {
        matches!(self, Self::AlreadyPresent | Self::AlreadyAbsent)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Applied => "applied",
            Self::Unchanged => "already satisfied",
            Self::AlreadyPresent => "already present",
            Self::Removed => "removed",
            Self::AlreadyAbsent => "already absent",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_never_touches_shared_rule() {
        assert!(Step::ForwardEstablished.is_shared());
        assert!(!Step::CLEANUP_ORDER.iter().any(|s| s.is_shared()));
    }

    #[test]
    fn cleanup_removes_filter_rules_before_namespace() {
        let pos = |step| Step::CLEANUP_ORDER.iter().position(|s| *s == step).unwrap();

        assert!(pos(Step::Masquerade) < pos(Step::PolicyRule));
        assert!(pos(Step::PolicyRule) < pos(Step::VethPair));
        assert!(pos(Step::VethPair) < pos(Step::Namespace));
        assert!(pos(Step::Namespace) < pos(Step::DnsConfig));
    }

    #[test]
    fn setup_creates_namespace_first() {
        assert_eq!(Step::SETUP_ORDER[0], Step::Namespace);
        assert_eq!(Step::SETUP_ORDER[12], Step::DnsConfig);
    }

    #[test]
    fn outcome_classification() {
        assert!(Outcome::Created.changed());
        assert!(!Outcome::Unchanged.changed());
        assert!(Outcome::AlreadyPresent.is_tolerated());
        assert!(!Outcome::Removed.is_tolerated());
    }
}
