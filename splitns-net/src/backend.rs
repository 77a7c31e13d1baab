//! Network backend trait for pluggable implementations

use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use splitns_core::{Error, InterfaceName, NamespaceName, Outcome, Result};

use crate::rule::{FirewallRule, PolicyRule};

/// Trait for host network backends
///
/// This allows for different implementations:
/// - [`SystemBackend`](crate::SystemBackend) - Production, drives `ip` and `iptables`
/// - [`MockBackend`] - Testing without touching the kernel
///
/// Existence checks never fail because a resource is absent; they return
/// `Ok(false)`. Mutations report [`Outcome::AlreadyPresent`] or
/// [`Outcome::AlreadyAbsent`] when the primitive says the target state
/// already holds, and `Err` for anything else.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Whether a named namespace is registered
    async fn namespace_exists(&self, name: &NamespaceName) -> Result<bool>;

    /// Register a new named namespace
    async fn create_namespace(&self, name: &NamespaceName) -> Result<Outcome>;

    /// Remove a named namespace and every link still inside it
    async fn delete_namespace(&self, name: &NamespaceName) -> Result<Outcome>;

    /// Whether a link exists in the root namespace
    async fn link_exists(&self, link: &InterfaceName) -> Result<bool>;

    /// Bring a link up, in the root namespace when `netns` is `None`
    async fn set_link_up(&self, netns: Option<&NamespaceName>, link: &InterfaceName)
    -> Result<Outcome>;

    /// Create a veth pair with `peer` placed directly into `netns`
    async fn create_veth_pair(
        &self,
        host: &InterfaceName,
        peer: &InterfaceName,
        netns: &NamespaceName,
    ) -> Result<Outcome>;

    /// Delete a root-namespace link; a veth peer goes with it
    async fn delete_link(&self, link: &InterfaceName) -> Result<Outcome>;

    /// Assign an address to a link
    async fn add_address(
        &self,
        netns: Option<&NamespaceName>,
        link: &InterfaceName,
        address: Ipv4Net,
    ) -> Result<Outcome>;

    /// Add a default route inside `netns`
    async fn add_default_route(&self, netns: &NamespaceName, gateway: Ipv4Addr)
    -> Result<Outcome>;

    /// Whether a policy rule with the same priority, source and table is installed
    async fn rule_exists(&self, rule: &PolicyRule) -> Result<bool>;

    /// Install a policy rule
    async fn add_rule(&self, rule: &PolicyRule) -> Result<Outcome>;

    /// Remove a policy rule
    async fn delete_rule(&self, rule: &PolicyRule) -> Result<Outcome>;

    /// Whether the exact packet filter rule is installed
    async fn firewall_rule_exists(&self, rule: &FirewallRule) -> Result<bool>;

    /// Append a packet filter rule to its chain
    async fn append_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome>;

    /// Remove a packet filter rule from its chain
    async fn delete_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome>;

    /// Whether the per-namespace config directory exists
    async fn dns_dir_exists(&self, dir: &Path) -> Result<bool>;

    /// Create the per-namespace config directory, world readable
    async fn create_dns_dir(&self, dir: &Path) -> Result<Outcome>;

    /// Copy the host resolver configuration into `dir`
    async fn copy_resolver(&self, source: &Path, dir: &Path) -> Result<()>;

    /// Remove the per-namespace config directory and its contents
    async fn remove_dns_dir(&self, dir: &Path) -> Result<Outcome>;

    /// Send one ping from inside `netns`, giving up after `timeout`
    async fn ping(&self, netns: &NamespaceName, target: Ipv4Addr, timeout: Duration)
    -> Result<bool>;
}

/// Mock backend for testing (doesn't touch the kernel)
///
/// Models just enough kernel behaviour to exercise reconciliation: duplicate
/// adds report [`Outcome::AlreadyPresent`], deleting a veth end removes its
/// peer, deleting a namespace removes the links inside it.
///
/// # Example
/// ```
/// use splitns_net::{MockBackend, NetworkBackend};
/// use splitns_core::{NamespaceName, Outcome};
///
/// # tokio_test::block_on(async {
/// let backend = MockBackend::new();
/// let ns = NamespaceName::new("home").unwrap();
///
/// assert_eq!(backend.create_namespace(&ns).await.unwrap(), Outcome::Created);
/// assert_eq!(backend.create_namespace(&ns).await.unwrap(), Outcome::AlreadyPresent);
/// assert!(backend.namespace_exists(&ns).await.unwrap());
/// # });
/// ```
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

type LinkKey = (Option<String>, String);

#[derive(Debug, Default, Clone)]
struct MockLink {
    peer: Option<LinkKey>,
    up: bool,
    addresses: Vec<Ipv4Net>,
}

#[derive(Default)]
struct MockState {
    namespaces: HashSet<String>,
    links: HashMap<LinkKey, MockLink>,
    routes: HashMap<String, Ipv4Addr>,
    rules: Vec<PolicyRule>,
    firewall: Vec<FirewallRule>,
    dns_dirs: HashMap<PathBuf, Option<PathBuf>>,
    unreachable: bool,
    failures: HashMap<&'static str, String>,
    mutations: Vec<String>,
}

impl MockState {
    fn record(&mut self, op: &'static str, detail: String) -> Result<()> {
        self.mutations.push(format!("{op} {detail}"));

        match self.failures.remove(op) {
            Some(stderr) => Err(Error::Command {
                program: "mock".to_string(),
                args: format!("{op} {detail}"),
                stderr,
            }),
            None => Ok(()),
        }
    }

    fn remove_link(&mut self, key: &LinkKey) -> bool {
        match self.links.remove(key) {
            Some(link) => {
                if let Some(peer) = link.peer {
                    self.links.remove(&peer);
                }
                true
            }
            None => false,
        }
    }
}

fn key(netns: Option<&NamespaceName>, link: &str) -> LinkKey {
    (netns.map(|n| n.as_str().to_string()), link.to_string())
}

fn no_device(link: &str) -> Error {
    Error::Command {
        program: "mock".to_string(),
        args: link.to_string(),
        stderr: format!("Cannot find device \"{link}\""),
    }
}

impl MockBackend {
    /// Create a new mock backend with an empty host
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Make the next call to `op` fail with `stderr` (for testing)
    ///
    /// `op` is the trait method name, e.g. `"create_veth_pair"`.
    pub async fn fail_on(&self, op: &'static str, stderr: impl Into<String>) {
        self.state.lock().await.failures.insert(op, stderr.into());
    }

    /// Make pings fail even when the namespace is wired up
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Install a packet filter rule as if another tool had added it
    pub async fn seed_firewall_rule(&self, rule: FirewallRule) {
        self.state.lock().await.firewall.push(rule);
    }

    /// Install a policy rule as if another tool had added it
    pub async fn seed_rule(&self, rule: PolicyRule) {
        self.state.lock().await.rules.push(rule);
    }

    /// Every mutating call attempted so far, in order
    pub async fn mutations(&self) -> Vec<String> {
        self.state.lock().await.mutations.clone()
    }

    /// Number of mutating calls attempted so far
    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations.len()
    }

    /// Check if a namespace is registered
    pub async fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().await.namespaces.contains(name)
    }

    /// Check if a link exists, in the root namespace when `netns` is `None`
    pub async fn has_link(&self, netns: Option<&str>, link: &str) -> bool {
        let key = (netns.map(str::to_string), link.to_string());
        self.state.lock().await.links.contains_key(&key)
    }

    /// Whether a link is up
    pub async fn link_is_up(&self, netns: Option<&str>, link: &str) -> bool {
        let key = (netns.map(str::to_string), link.to_string());
        self.state.lock().await.links.get(&key).is_some_and(|l| l.up)
    }

    /// Addresses assigned to a link
    pub async fn addresses(&self, netns: Option<&str>, link: &str) -> Vec<Ipv4Net> {
        let key = (netns.map(str::to_string), link.to_string());
        self.state
            .lock()
            .await
            .links
            .get(&key)
            .map(|l| l.addresses.clone())
            .unwrap_or_default()
    }

    /// Default route gateway inside a namespace
    pub async fn default_route(&self, netns: &str) -> Option<Ipv4Addr> {
        self.state.lock().await.routes.get(netns).copied()
    }

    /// Installed policy rules
    pub async fn rules(&self) -> Vec<PolicyRule> {
        self.state.lock().await.rules.clone()
    }

    /// Installed packet filter rules, in chain order
    pub async fn firewall_rules(&self) -> Vec<FirewallRule> {
        self.state.lock().await.firewall.clone()
    }

    /// Resolver source copied into `dir`; outer `None` if `dir` doesn't exist
    pub async fn dns_dir(&self, dir: &Path) -> Option<Option<PathBuf>> {
        self.state.lock().await.dns_dirs.get(dir).cloned()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkBackend for MockBackend {
    async fn namespace_exists(&self, name: &NamespaceName) -> Result<bool> {
        Ok(self.state.lock().await.namespaces.contains(name.as_str()))
    }

    async fn create_namespace(&self, name: &NamespaceName) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("create_namespace", name.to_string())?;

        if !state.namespaces.insert(name.to_string()) {
            return Ok(Outcome::AlreadyPresent);
        }

        // Every new namespace comes with a loopback link, down
        state.links.insert(key(Some(name), "lo"), MockLink::default());

        tracing::debug!(namespace = %name, "Mock: Created namespace");
        Ok(Outcome::Created)
    }

    async fn delete_namespace(&self, name: &NamespaceName) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("delete_namespace", name.to_string())?;

        if !state.namespaces.remove(name.as_str()) {
            return Ok(Outcome::AlreadyAbsent);
        }

        let inside: Vec<LinkKey> = state
            .links
            .keys()
            .filter(|(ns, _)| ns.as_deref() == Some(name.as_str()))
            .cloned()
            .collect();
        for link in &inside {
            state.remove_link(link);
        }
        state.routes.remove(name.as_str());

        tracing::debug!(namespace = %name, links_removed = inside.len(), "Mock: Deleted namespace");
        Ok(Outcome::Removed)
    }

    async fn link_exists(&self, link: &InterfaceName) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .links
            .contains_key(&key(None, link.as_str())))
    }

    async fn set_link_up(
        &self,
        netns: Option<&NamespaceName>,
        link: &InterfaceName,
    ) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("set_link_up", link.to_string())?;

        let entry = state
            .links
            .get_mut(&key(netns, link.as_str()))
            .ok_or_else(|| no_device(link.as_str()))?;
        entry.up = true;

        Ok(Outcome::Applied)
    }

    async fn create_veth_pair(
        &self,
        host: &InterfaceName,
        peer: &InterfaceName,
        netns: &NamespaceName,
    ) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("create_veth_pair", format!("{host} {peer} {netns}"))?;

        if !state.namespaces.contains(netns.as_str()) {
            return Err(Error::Command {
                program: "mock".to_string(),
                args: format!("link add {host} peer {peer} netns {netns}"),
                stderr: format!("Invalid \"netns\" value \"{netns}\""),
            });
        }

        let host_key = key(None, host.as_str());
        let peer_key = key(Some(netns), peer.as_str());

        if state.links.contains_key(&host_key) || state.links.contains_key(&peer_key) {
            return Ok(Outcome::AlreadyPresent);
        }

        state.links.insert(
            host_key.clone(),
            MockLink {
                peer: Some(peer_key.clone()),
                ..MockLink::default()
            },
        );
        state.links.insert(
            peer_key,
            MockLink {
                peer: Some(host_key),
                ..MockLink::default()
            },
        );

        tracing::debug!(host = %host, peer = %peer, namespace = %netns, "Mock: Created veth pair");
        Ok(Outcome::Created)
    }

    async fn delete_link(&self, link: &InterfaceName) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("delete_link", link.to_string())?;

        if state.remove_link(&key(None, link.as_str())) {
            Ok(Outcome::Removed)
        } else {
            Ok(Outcome::AlreadyAbsent)
        }
    }

    async fn add_address(
        &self,
        netns: Option<&NamespaceName>,
        link: &InterfaceName,
        address: Ipv4Net,
    ) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("add_address", format!("{address} {link}"))?;

        let entry = state
            .links
            .get_mut(&key(netns, link.as_str()))
            .ok_or_else(|| no_device(link.as_str()))?;

        if entry.addresses.contains(&address) {
            return Ok(Outcome::AlreadyPresent);
        }
        entry.addresses.push(address);

        Ok(Outcome::Created)
    }

    async fn add_default_route(
        &self,
        netns: &NamespaceName,
        gateway: Ipv4Addr,
    ) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("add_default_route", format!("{netns} via {gateway}"))?;

        if state.routes.contains_key(netns.as_str()) {
            return Ok(Outcome::AlreadyPresent);
        }

        let reachable = state.links.iter().any(|((ns, _), link)| {
            ns.as_deref() == Some(netns.as_str())
                && link.up
                && link.addresses.iter().any(|a| a.contains(&gateway))
        });
        if !reachable {
            return Err(Error::Command {
                program: "mock".to_string(),
                args: format!("route add default via {gateway}"),
                stderr: "Error: Nexthop has invalid gateway.".to_string(),
            });
        }

        state.routes.insert(netns.to_string(), gateway);
        Ok(Outcome::Created)
    }

    async fn rule_exists(&self, rule: &PolicyRule) -> Result<bool> {
        Ok(self.state.lock().await.rules.contains(rule))
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("add_rule", rule.to_string())?;

        if state.rules.contains(rule) {
            return Ok(Outcome::AlreadyPresent);
        }
        state.rules.push(rule.clone());

        Ok(Outcome::Created)
    }

    async fn delete_rule(&self, rule: &PolicyRule) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("delete_rule", rule.to_string())?;

        match state.rules.iter().position(|r| r == rule) {
            Some(index) => {
                state.rules.remove(index);
                Ok(Outcome::Removed)
            }
            None => Ok(Outcome::AlreadyAbsent),
        }
    }

    async fn firewall_rule_exists(&self, rule: &FirewallRule) -> Result<bool> {
        Ok(self.state.lock().await.firewall.contains(rule))
    }

    async fn append_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("append_firewall_rule", rule.to_string())?;

        // iptables happily appends duplicates
        state.firewall.push(rule.clone());
        Ok(Outcome::Created)
    }

    async fn delete_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("delete_firewall_rule", rule.to_string())?;

        match state.firewall.iter().position(|r| r == rule) {
            Some(index) => {
                state.firewall.remove(index);
                Ok(Outcome::Removed)
            }
            None => Ok(Outcome::AlreadyAbsent),
        }
    }

    async fn dns_dir_exists(&self, dir: &Path) -> Result<bool> {
        Ok(self.state.lock().await.dns_dirs.contains_key(dir))
    }

    async fn create_dns_dir(&self, dir: &Path) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("create_dns_dir", dir.display().to_string())?;

        if state.dns_dirs.contains_key(dir) {
            return Ok(Outcome::AlreadyPresent);
        }
        state.dns_dirs.insert(dir.to_path_buf(), None);

        Ok(Outcome::Created)
    }

    async fn copy_resolver(&self, source: &Path, dir: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record("copy_resolver", format!("{} {}", source.display(), dir.display()))?;

        let slot = state.dns_dirs.get_mut(dir).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", dir.display()),
            ))
        })?;
        *slot = Some(source.to_path_buf());

        Ok(())
    }

    async fn remove_dns_dir(&self, dir: &Path) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        state.record("remove_dns_dir", dir.display().to_string())?;

        if state.dns_dirs.remove(dir).is_some() {
            Ok(Outcome::Removed)
        } else {
            Ok(Outcome::AlreadyAbsent)
        }
    }

    async fn ping(
        &self,
        netns: &NamespaceName,
        target: Ipv4Addr,
        _timeout: Duration,
    ) -> Result<bool> {
        let state = self.state.lock().await;

        let wired = state.namespaces.contains(netns.as_str())
            && state.routes.contains_key(netns.as_str());

        tracing::trace!(namespace = %netns, %target, wired, "Mock: Ping");

        Ok(wired && !state.unreachable)
    }
}
