//! Policy routing and packet filter rule specifications

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Source-based policy routing rule: `from <source> lookup <table>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Source address the rule matches
    pub source: Ipv4Addr,
    /// Routing table to consult
    pub table: String,
    /// Rule priority, distinguishes this rule from others on the host
    pub priority: u32,
}

impl PolicyRule {
    /// Rule sending traffic from `source` through the main table
    #[must_use]
    pub fn main_table(source: Ipv4Addr, priority: u32) -> Self {
        Self {
            source,
            table: "main".to_string(),
            priority,
        }
    }

    /// Arguments for `ip rule add`
    #[must_use]
    pub fn add_args(&self) -> Vec<String> {
        vec![
            "rule".to_string(),
            "add".to_string(),
            "from".to_string(),
            self.source.to_string(),
            "lookup".to_string(),
            self.table.clone(),
            "priority".to_string(),
            self.priority.to_string(),
        ]
    }

    /// Arguments for `ip rule del`
    ///
    /// Includes the priority so a rule for the same source owned by another
    /// tool is left alone.
    #[must_use]
    pub fn del_args(&self) -> Vec<String> {
        vec![
            "rule".to_string(),
            "del".to_string(),
            "from".to_string(),
            self.source.to_string(),
            "lookup".to_string(),
            self.table.clone(),
            "priority".to_string(),
            self.priority.to_string(),
        ]
    }

    /// Whether one line of `ip rule show` describes this rule
    ///
    /// Lines look like `100:\tfrom 10.99.99.5 lookup main`.
    #[must_use]
    pub fn matches_line(&self, line: &str) -> bool {
        let Some((priority, selector)) = line.split_once(':') else {
            return false;
        };
        if priority.trim().parse::<u32>().ok() != Some(self.priority) {
            return false;
        }

        let tokens: Vec<&str> = selector.split_whitespace().collect();
        let source = self.source.to_string();
        let source_cidr = format!("{source}/32");

        let from_matches = tokens
            .windows(2)
            .any(|w| w[0] == "from" && (w[1] == source || w[1] == source_cidr));
        let table_matches = tokens
            .windows(2)
            .any(|w| (w[0] == "lookup" || w[0] == "table") && w[1] == self.table);

        from_matches && table_matches
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: from {} lookup {}",
            self.priority, self.source, self.table
        )
    }
}

/// A single iptables rule, keyed by its exact specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Table (`nat`, `filter`)
    pub table: String,
    /// Chain within the table
    pub chain: String,
    /// Match and target, as passed to iptables
    pub spec: String,
}

impl FirewallRule {
    /// Create a rule from its parts
    #[must_use]
    pub fn new(table: impl Into<String>, chain: impl Into<String>, spec: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            chain: chain.into(),
            spec: spec.into(),
        }
    }

    /// NAT masquerade for traffic sourced from `source`
    #[must_use]
    pub fn masquerade(source: Ipv4Addr) -> Self {
        Self::new("nat", "POSTROUTING", format!("-s {source} -j MASQUERADE"))
    }

    /// Forward accept for return traffic of existing connections
    ///
    /// Shared with anything else on the host that forwards packets.
    #[must_use]
    pub fn forward_established() -> Self {
        Self::new(
            "filter",
            "FORWARD",
            "-m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT",
        )
    }

    /// Forward accept for traffic sourced from `source`
    #[must_use]
    pub fn forward_from(source: Ipv4Addr) -> Self {
        Self::new("filter", "FORWARD", format!("-s {source} -j ACCEPT"))
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.spec)
    }
}
