//! Production backend driving iproute2 and iptables

use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use splitns_core::{Error, InterfaceName, NamespaceName, Outcome, Result};

use crate::backend::NetworkBackend;
use crate::command::{CommandOutput, CommandRunner, FailureKind, command_error};
use crate::dns::{RESOLV_CONF, RESOLVED_UPSTREAM, resolver_source};
use crate::parse;
use crate::rule::{FirewallRule, PolicyRule};

/// Mode applied to `/etc/netns/<name>` so unprivileged processes can read it
const DNS_DIR_MODE: u32 = 0o755;

/// Host backend
///
/// Links, addresses, routes and policy rules go through the `ip` tool;
/// packet filter rules go through the `iptables` crate, whose existence check
/// uses `iptables -C` rather than parsing rule dumps.
pub struct SystemBackend {
    runner: CommandRunner,
    iptables: Arc<iptables::IPTables>,
    resolved_upstream: PathBuf,
}

impl SystemBackend {
    /// Create a backend that modifies the host
    ///
    /// # Errors
    /// Returns error if `iptables` cannot be located
    pub fn new() -> Result<Self> {
        Self::with_runner(CommandRunner::new())
    }

    /// Create a backend that queries the host but only logs changes
    ///
    /// # Errors
    /// Returns error if `iptables` cannot be located
    pub fn dry_run() -> Result<Self> {
        Self::with_runner(CommandRunner::dry_run())
    }

    fn with_runner(runner: CommandRunner) -> Result<Self> {
        let iptables = iptables::new(false).map_err(|e| Error::Firewall {
            message: format!("Failed to initialise iptables: {e}"),
        })?;

        Ok(Self {
            runner,
            iptables: Arc::new(iptables),
            resolved_upstream: PathBuf::from(RESOLVED_UPSTREAM),
        })
    }

    /// Override where the systemd-resolved upstream list is looked up
    #[must_use]
    pub fn with_resolved_upstream(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolved_upstream = path.into();
        self
    }

    async fn ip_query(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.query("ip", args).await
    }

    async fn ip_apply<'a>(&self, args: &'a [String]) -> Result<(CommandOutput, Vec<&'a str>)> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.runner.apply("ip", &refs).await?;
        Ok((output, refs))
    }

    /// Run an `ip ... add`; "exists" failures become [`Outcome::AlreadyPresent`]
    async fn ip_add(&self, args: &[String]) -> Result<Outcome> {
        let (output, refs) = self.ip_apply(args).await?;

        if output.success {
            return Ok(Outcome::Created);
        }

        match FailureKind::classify(&output.stderr) {
            FailureKind::Exists => {
                debug!(command = %refs.join(" "), stderr = %output.stderr, "Already present");
                Ok(Outcome::AlreadyPresent)
            }
            _ => Err(command_error("ip", &refs, &output)),
        }
    }

    /// Run an `ip ... del`; "missing" failures become [`Outcome::AlreadyAbsent`]
    async fn ip_del(&self, args: &[String]) -> Result<Outcome> {
        let (output, refs) = self.ip_apply(args).await?;

        if output.success {
            return Ok(Outcome::Removed);
        }

        match FailureKind::classify(&output.stderr) {
            FailureKind::Missing => {
                debug!(command = %refs.join(" "), stderr = %output.stderr, "Already absent");
                Ok(Outcome::AlreadyAbsent)
            }
            _ => Err(command_error("ip", &refs, &output)),
        }
    }

    async fn firewall<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&iptables::IPTables) -> std::result::Result<T, Box<dyn std::error::Error>>
            + Send
            + 'static,
    {
        let iptables = Arc::clone(&self.iptables);

        tokio::task::spawn_blocking(move || op(&iptables).map_err(|e| e.to_string()))
            .await?
            .map_err(|message| Error::Firewall { message })
    }
}

impl std::fmt::Debug for SystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemBackend")
            .field("runner", &self.runner)
            .field("resolved_upstream", &self.resolved_upstream)
            .finish_non_exhaustive()
    }
}

/// `ip` arguments, prefixed with `-n <netns>` when targeting a namespace
fn ip_args(netns: Option<&NamespaceName>, rest: &[&str]) -> Vec<String> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    if let Some(ns) = netns {
        args.push("-n".to_string());
        args.push(ns.to_string());
    }
    args.extend(rest.iter().map(|s| (*s).to_string()));
    args
}

/// Whole seconds for `ping -W`, at least one
fn ping_wait_secs(timeout: Duration) -> u64 {
    timeout.as_secs().max(1)
}

/// Outer bound on the whole probe command, one second past `ping -W`
fn ping_grace(timeout: Duration) -> Duration {
    timeout.saturating_add(Duration::from_secs(1))
}

#[async_trait]
impl NetworkBackend for SystemBackend {
    async fn namespace_exists(&self, name: &NamespaceName) -> Result<bool> {
        let output = self.ip_query(&["netns", "list"]).await?;
        if !output.success {
            return Err(command_error("ip", &["netns", "list"], &output));
        }

        Ok(parse::netns_listed(&output.stdout, name.as_str()))
    }

    async fn create_namespace(&self, name: &NamespaceName) -> Result<Outcome> {
        self.ip_add(&ip_args(None, &["netns", "add", name.as_str()]))
            .await
    }

    async fn delete_namespace(&self, name: &NamespaceName) -> Result<Outcome> {
        self.ip_del(&ip_args(None, &["netns", "delete", name.as_str()]))
            .await
    }

    async fn link_exists(&self, link: &InterfaceName) -> Result<bool> {
        let output = self
            .ip_query(&["link", "show", "dev", link.as_str()])
            .await?;
        Ok(output.success)
    }

    async fn set_link_up(
        &self,
        netns: Option<&NamespaceName>,
        link: &InterfaceName,
    ) -> Result<Outcome> {
        let args = ip_args(netns, &["link", "set", "dev", link.as_str(), "up"]);
        let (output, refs) = self.ip_apply(&args).await?;

        if output.success {
            Ok(Outcome::Applied)
        } else {
            Err(command_error("ip", &refs, &output))
        }
    }

    async fn create_veth_pair(
        &self,
        host: &InterfaceName,
        peer: &InterfaceName,
        netns: &NamespaceName,
    ) -> Result<Outcome> {
        self.ip_add(&ip_args(
            None,
            &[
                "link",
                "add",
                host.as_str(),
                "type",
                "veth",
                "peer",
                "name",
                peer.as_str(),
                "netns",
                netns.as_str(),
            ],
        ))
        .await
    }

    async fn delete_link(&self, link: &InterfaceName) -> Result<Outcome> {
        self.ip_del(&ip_args(None, &["link", "delete", "dev", link.as_str()]))
            .await
    }

    async fn add_address(
        &self,
        netns: Option<&NamespaceName>,
        link: &InterfaceName,
        address: Ipv4Net,
    ) -> Result<Outcome> {
        let cidr = address.to_string();
        self.ip_add(&ip_args(
            netns,
            &["addr", "add", cidr.as_str(), "dev", link.as_str()],
        ))
        .await
    }

    async fn add_default_route(
        &self,
        netns: &NamespaceName,
        gateway: Ipv4Addr,
    ) -> Result<Outcome> {
        let via = gateway.to_string();
        self.ip_add(&ip_args(
            Some(netns),
            &["route", "add", "default", "via", via.as_str()],
        ))
        .await
    }

    async fn rule_exists(&self, rule: &PolicyRule) -> Result<bool> {
        let output = self.ip_query(&["rule", "show"]).await?;
        if !output.success {
            return Err(command_error("ip", &["rule", "show"], &output));
        }

        Ok(output.stdout.lines().any(|line| rule.matches_line(line)))
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<Outcome> {
        self.ip_add(&rule.add_args()).await
    }

    async fn delete_rule(&self, rule: &PolicyRule) -> Result<Outcome> {
        self.ip_del(&rule.del_args()).await
    }

    async fn firewall_rule_exists(&self, rule: &FirewallRule) -> Result<bool> {
        let rule = rule.clone();
        self.firewall(move |ipt| ipt.exists(&rule.table, &rule.chain, &rule.spec))
            .await
    }

    async fn append_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome> {
        if self.runner.is_dry_run() {
            info!(rule = %rule, "Dry run: skipping iptables -A");
            return Ok(Outcome::Created);
        }

        let owned = rule.clone();
        self.firewall(move |ipt| ipt.append(&owned.table, &owned.chain, &owned.spec))
            .await?;

        Ok(Outcome::Created)
    }

    async fn delete_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome> {
        if self.runner.is_dry_run() {
            info!(rule = %rule, "Dry run: skipping iptables -D");
            return Ok(Outcome::Removed);
        }

        let owned = rule.clone();
        match self
            .firewall(move |ipt| ipt.delete(&owned.table, &owned.chain, &owned.spec))
            .await
        {
            Ok(()) => Ok(Outcome::Removed),
            Err(Error::Firewall { message }) if message.contains("matching rule exist") => {
                debug!(rule = %rule, "Already absent");
                Ok(Outcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    async fn dns_dir_exists(&self, dir: &Path) -> Result<bool> {
        Ok(fs::try_exists(dir).await?)
    }

    async fn create_dns_dir(&self, dir: &Path) -> Result<Outcome> {
        let existed = fs::try_exists(dir).await?;

        if self.runner.is_dry_run() {
            info!(dir = %dir.display(), "Dry run: skipping mkdir");
            return Ok(if existed {
                Outcome::AlreadyPresent
            } else {
                Outcome::Created
            });
        }

        fs::create_dir_all(dir).await?;
        fs::set_permissions(dir, std::fs::Permissions::from_mode(DNS_DIR_MODE)).await?;

        if existed {
            Ok(Outcome::AlreadyPresent)
        } else {
            Ok(Outcome::Created)
        }
    }

    async fn copy_resolver(&self, source: &Path, dir: &Path) -> Result<()> {
        let source = resolver_source(source, &self.resolved_upstream).await;
        let target = dir.join(RESOLV_CONF);

        if self.runner.is_dry_run() {
            info!(
                source = %source.display(),
                target = %target.display(),
                "Dry run: skipping resolver copy"
            );
            return Ok(());
        }

        let bytes = fs::copy(&source, &target).await?;
        debug!(
            source = %source.display(),
            target = %target.display(),
            bytes,
            "Copied resolver configuration"
        );

        Ok(())
    }

    async fn remove_dns_dir(&self, dir: &Path) -> Result<Outcome> {
        if self.runner.is_dry_run() {
            info!(dir = %dir.display(), "Dry run: skipping rm -r");
            return Ok(Outcome::Removed);
        }

        match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(Outcome::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Outcome::AlreadyAbsent),
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(
        &self,
        netns: &NamespaceName,
        target: Ipv4Addr,
        timeout: Duration,
    ) -> Result<bool> {
        let wait = ping_wait_secs(timeout).to_string();
        let target = target.to_string();
        let args = [
            "netns",
            "exec",
            netns.as_str(),
            "ping",
            "-c",
            "1",
            "-W",
            wait.as_str(),
            target.as_str(),
        ];

        // ping's own -W bounds the wait for a reply; the outer timeout also
        // covers a stalled resolver or exec
        let grace = ping_grace(timeout);
        match tokio::time::timeout(grace, self.ip_query(&args)).await {
            Ok(output) => Ok(output?.success),
            Err(_) => {
                warn!(namespace = %netns, target = %target, "Ping timed out");
                Ok(false)
            }
        }
    }
}
