//! Desired topology configuration

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use splitns_core::{Error, InterfaceName, NamespaceName, Result};
use splitns_net::{FirewallRule, PolicyRule};

/// Longest connectivity probe a profile may ask for
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 60;

/// Desired namespace topology
///
/// Everything the reconciler needs to know about one bypass namespace. The
/// default is the `home` profile; JSON profiles may override any subset of
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Namespace name
    pub namespace: NamespaceName,

    /// Veth end left in the root namespace
    pub host_veth: InterfaceName,

    /// Veth end moved into the namespace
    pub namespace_veth: InterfaceName,

    /// Address of the host end; its host part is the namespace's gateway
    pub host_address: Ipv4Net,

    /// Address of the namespace end; its host part is the routed source
    pub namespace_address: Ipv4Net,

    /// Priority of the `from <namespace ip> lookup main` rule
    pub rule_priority: u32,

    /// Address pinged from inside the namespace by `status`
    pub probe_target: Ipv4Addr,

    /// Upper bound on the connectivity probe
    pub probe_timeout_secs: u64,

    /// Host resolver file copied into the namespace
    pub resolv_conf: PathBuf,

    /// Directory holding per-namespace config (`/etc/netns`)
    pub netns_root: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            namespace: NamespaceName::new("home").expect("valid default namespace"),
            host_veth: InterfaceName::new("to-home").expect("valid default interface"),
            namespace_veth: InterfaceName::new("from-home").expect("valid default interface"),
            host_address: Ipv4Net::new_assert(Ipv4Addr::new(10, 99, 99, 1), 24),
            namespace_address: Ipv4Net::new_assert(Ipv4Addr::new(10, 99, 99, 5), 24),
            rule_priority: 100,
            probe_target: Ipv4Addr::new(1, 1, 1, 1),
            probe_timeout_secs: 3,
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            netns_root: PathBuf::from("/etc/netns"),
        }
    }
}

impl TopologyConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a profile from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or fails validation
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("Cannot read {}: {e}", path.display()))
        })?;

        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!(path = %path.display(), namespace = %config.namespace, "Loaded profile");
        Ok(config)
    }

    /// Set the namespace name
    #[must_use]
    pub fn with_namespace(mut self, namespace: NamespaceName) -> Self {
        self.namespace = namespace;
        self
    }

    /// Set both veth end names
    #[must_use]
    pub fn with_veth_names(mut self, host: InterfaceName, namespace: InterfaceName) -> Self {
        self.host_veth = host;
        self.namespace_veth = namespace;
        self
    }

    /// Set both veth end addresses
    #[must_use]
    pub fn with_addresses(mut self, host: Ipv4Net, namespace: Ipv4Net) -> Self {
        self.host_address = host;
        self.namespace_address = namespace;
        self
    }

    /// Set the policy rule priority
    #[must_use]
    pub fn with_rule_priority(mut self, priority: u32) -> Self {
        self.rule_priority = priority;
        self
    }

    /// Set the address pinged by `status`
    #[must_use]
    pub fn with_probe_target(mut self, target: Ipv4Addr) -> Self {
        self.probe_target = target;
        self
    }

    /// Set the connectivity probe bound
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the host resolver file
    #[must_use]
    pub fn with_resolv_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolv_conf = path.into();
        self
    }

    /// Set the per-namespace config root
    #[must_use]
    pub fn with_netns_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.netns_root = path.into();
        self
    }

    /// Check the profile is internally consistent
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.host_veth == self.namespace_veth {
            return Err(Error::invalid_config(format!(
                "Host and namespace veth ends are both named '{}'",
                self.host_veth
            )));
        }

        if self.host_veth.as_str() == "lo" || self.namespace_veth.as_str() == "lo" {
            return Err(Error::invalid_config("Veth ends cannot be named 'lo'"));
        }

        if self.gateway() == self.namespace_ip() {
            return Err(Error::invalid_config(format!(
                "Host and namespace share address {}",
                self.gateway()
            )));
        }

        if self.host_address.trunc() != self.namespace_address.trunc() {
            return Err(Error::invalid_config(format!(
                "{} and {} are not in the same subnet",
                self.host_address, self.namespace_address
            )));
        }

        for addr in [self.gateway(), self.namespace_ip()] {
            let net = self.host_address;
            if net.prefix_len() < 31 && (addr == net.network() || addr == net.broadcast()) {
                return Err(Error::invalid_config(format!(
                    "{addr} is the network or broadcast address of {net}"
                )));
            }
        }

        if self.probe_timeout_secs == 0 {
            return Err(Error::invalid_config("Probe timeout must be at least one second"));
        }

        if self.probe_timeout_secs > MAX_PROBE_TIMEOUT_SECS {
            return Err(Error::invalid_config(format!(
                "Probe timeout of {}s exceeds the {MAX_PROBE_TIMEOUT_SECS}s limit",
                self.probe_timeout_secs
            )));
        }

        Ok(())
    }

    /// Default gateway inside the namespace
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.host_address.addr()
    }

    /// Source address of traffic leaving the namespace
    #[must_use]
    pub fn namespace_ip(&self) -> Ipv4Addr {
        self.namespace_address.addr()
    }

    /// Connectivity probe bound
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// `from <namespace ip> lookup main` at the configured priority
    #[must_use]
    pub fn policy_rule(&self) -> PolicyRule {
        PolicyRule::main_table(self.namespace_ip(), self.rule_priority)
    }

    /// NAT masquerade for the namespace source address
    #[must_use]
    pub fn masquerade_rule(&self) -> FirewallRule {
        FirewallRule::masquerade(self.namespace_ip())
    }

    /// Forward accept owned by this namespace
    #[must_use]
    pub fn forward_rule(&self) -> FirewallRule {
        FirewallRule::forward_from(self.namespace_ip())
    }

    /// `/etc/netns/<name>`
    #[must_use]
    pub fn dns_dir(&self) -> PathBuf {
        self.netns_root.join(self.namespace.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TopologyConfig::default();
        assert_eq!(config.namespace.as_str(), "home");
        assert_eq!(config.host_veth.as_str(), "to-home");
        assert_eq!(config.namespace_ip(), Ipv4Addr::new(10, 99, 99, 5));
        assert_eq!(config.gateway(), Ipv4Addr::new(10, 99, 99, 1));
        assert_eq!(config.dns_dir(), PathBuf::from("/etc/netns/home"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TopologyConfig::new()
            .with_namespace(NamespaceName::new("work").unwrap())
            .with_rule_priority(250)
            .with_probe_timeout(Duration::from_secs(5))
            .with_netns_root("/tmp/netns");

        assert_eq!(config.dns_dir(), PathBuf::from("/tmp/netns/work"));
        assert_eq!(config.policy_rule().priority, 250);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rules_follow_namespace_address() {
        let config = TopologyConfig::default();

        assert_eq!(config.masquerade_rule().spec, "-s 10.99.99.5 -j MASQUERADE");
        assert_eq!(config.forward_rule().spec, "-s 10.99.99.5 -j ACCEPT");
        assert_eq!(config.policy_rule().source, config.namespace_ip());
    }

    #[test]
    fn test_validate_rejects_split_subnets() {
        let config = TopologyConfig::new().with_addresses(
            "10.99.99.1/24".parse().unwrap(),
            "10.99.98.5/24".parse().unwrap(),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_address() {
        let config = TopologyConfig::new().with_addresses(
            "10.99.99.5/24".parse().unwrap(),
            "10.99.99.5/24".parse().unwrap(),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_network_address() {
        let config = TopologyConfig::new().with_addresses(
            "10.99.99.0/24".parse().unwrap(),
            "10.99.99.5/24".parse().unwrap(),
        );
        assert!(config.validate().is_err());

        // /31 point-to-point links have no network or broadcast address
        let config = TopologyConfig::new().with_addresses(
            "10.99.99.4/31".parse().unwrap(),
            "10.99.99.5/31".parse().unwrap(),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_identical_veth_names() {
        let name = InterfaceName::new("veth0").unwrap();
        let config = TopologyConfig::new().with_veth_names(name.clone(), name);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_probe_timeout() {
        let config = TopologyConfig::new().with_probe_timeout(Duration::from_secs(60));
        assert!(config.validate().is_ok());

        let config = TopologyConfig::new().with_probe_timeout(Duration::from_secs(61));
        assert!(config.validate().is_err());

        let config: TopologyConfig =
            serde_json::from_str(r#"{"probe_timeout_secs": 18446744073709551615}"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_partial_json_profile() {
        let config: TopologyConfig =
            serde_json::from_str(r#"{"namespace": "work", "rule_priority": 300}"#).unwrap();

        assert_eq!(config.namespace.as_str(), "work");
        assert_eq!(config.rule_priority, 300);
        assert_eq!(config.host_veth.as_str(), "to-home");
    }

    #[test]
    fn test_json_rejects_bad_cidr() {
        let result: std::result::Result<TopologyConfig, _> =
            serde_json::from_str(r#"{"host_address": "10.99.99.1"}"#);
        assert!(result.is_err());
    }
}
