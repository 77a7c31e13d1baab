//! Setup, cleanup and status against a [`NetworkBackend`]

use std::sync::Arc;
use splitns_core::{Error, InterfaceName, Outcome, Result, StatusReport, Step, StepReport};
use splitns_net::{FirewallRule, NetworkBackend};

use crate::config::TopologyConfig;

/// Converges the host towards a [`TopologyConfig`]
///
/// Every step is guarded by an existence predicate or is idempotent on its
/// own, so running `setup` or `cleanup` any number of times ends in the same
/// host state. Nothing is rolled back: a fatal error leaves earlier steps in
/// place and the next run picks up from there.
pub struct Reconciler {
    config: TopologyConfig,
    backend: Arc<dyn NetworkBackend>,
    loopback: InterfaceName,
}

impl Reconciler {
    /// Create a reconciler for a validated profile
    ///
    /// # Errors
    /// Returns error if the profile fails [`TopologyConfig::validate`]
    pub fn new(config: TopologyConfig, backend: Arc<dyn NetworkBackend>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            backend,
            loopback: InterfaceName::new("lo")?,
        })
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Bring the namespace, its wiring, routing, filtering and DNS up
    ///
    /// Steps run in [`Step::SETUP_ORDER`]; the first unexpected failure
    /// aborts the run.
    ///
    /// # Errors
    /// Returns the first primitive failure that isn't "already exists"
    pub async fn setup(&self) -> Result<Vec<StepReport>> {
        tracing::info!(namespace = %self.config.namespace, "Setting up namespace");

        let mut reports = Vec::with_capacity(Step::SETUP_ORDER.len());
        for step in Step::SETUP_ORDER {
            let outcome = self.ensure(step).await.map_err(|e| {
                tracing::error!(step = %step, error = %e, "Setup step failed");
                e
            })?;

            let report = StepReport::new(step, outcome);
            report.emit_trace();
            reports.push(report);
        }

        tracing::info!(
            namespace = %self.config.namespace,
            changed = reports.iter().filter(|r| r.outcome.changed()).count(),
            "Setup complete"
        );
        Ok(reports)
    }

    /// Tear down everything `setup` created except shared resources
    ///
    /// Steps run in [`Step::CLEANUP_ORDER`]. Absent resources are skipped.
    ///
    /// # Errors
    /// Returns the first primitive failure that isn't "does not exist"
    pub async fn cleanup(&self) -> Result<Vec<StepReport>> {
        tracing::info!(namespace = %self.config.namespace, "Cleaning up namespace");

        let mut reports = Vec::with_capacity(Step::CLEANUP_ORDER.len());
        for step in Step::CLEANUP_ORDER {
            let outcome = self.remove(step).await.map_err(|e| {
                tracing::error!(step = %step, error = %e, "Cleanup step failed");
                e
            })?;

            let report = StepReport::new(step, outcome);
            report.emit_trace();
            reports.push(report);
        }

        tracing::info!(namespace = %self.config.namespace, "Cleanup complete");
        Ok(reports)
    }

    /// Inspect the host without changing it
    ///
    /// Stops after the first check when the namespace doesn't exist. A probe
    /// that cannot run counts as no connectivity.
    ///
    /// # Errors
    /// Returns error if a query tool cannot be run
    pub async fn status(&self) -> Result<StatusReport> {
        let config = &self.config;

        if !self.backend.namespace_exists(&config.namespace).await? {
            let report = StatusReport::absent(config.namespace.clone());
            report.emit_trace();
            return Ok(report);
        }

        let veth_present = self.backend.link_exists(&config.host_veth).await?;
        let policy_rule_present = self.backend.rule_exists(&config.policy_rule()).await?;
        let masquerade_present = self
            .backend
            .firewall_rule_exists(&config.masquerade_rule())
            .await?;

        let connectivity = match self
            .backend
            .ping(&config.namespace, config.probe_target, config.probe_timeout())
            .await
        {
            Ok(reachable) => reachable,
            Err(e) => {
                tracing::debug!(error = %e, target = %config.probe_target, "Probe did not run");
                false
            }
        };

        let report = StatusReport {
            namespace: config.namespace.clone(),
            namespace_present: true,
            veth_present: Some(veth_present),
            policy_rule_present: Some(policy_rule_present),
            masquerade_present: Some(masquerade_present),
            connectivity: Some(connectivity),
        };
        report.emit_trace();

        Ok(report)
    }

    async fn ensure(&self, step: Step) -> Result<Outcome> {
        let config = &self.config;
        let ns = &config.namespace;
        let backend = &self.backend;

        tracing::debug!(step = %step, namespace = %ns, "Ensuring");

        match step {
            Step::Namespace => {
                if backend.namespace_exists(ns).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend.create_namespace(ns).await
            }
            Step::Loopback => backend.set_link_up(Some(ns), &self.loopback).await,
            Step::VethPair => {
                if backend.link_exists(&config.host_veth).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend
                    .create_veth_pair(&config.host_veth, &config.namespace_veth, ns)
                    .await
            }
            Step::HostAddress => {
                backend
                    .add_address(None, &config.host_veth, config.host_address)
                    .await
            }
            Step::HostLinkUp => backend.set_link_up(None, &config.host_veth).await,
            Step::NamespaceAddress => {
                backend
                    .add_address(Some(ns), &config.namespace_veth, config.namespace_address)
                    .await
            }
            Step::NamespaceLinkUp => backend.set_link_up(Some(ns), &config.namespace_veth).await,
            Step::DefaultRoute => backend.add_default_route(ns, config.gateway()).await,
            Step::PolicyRule => {
                let rule = config.policy_rule();
                if backend.rule_exists(&rule).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend.add_rule(&rule).await
            }
            Step::Masquerade => self.ensure_firewall_rule(&config.masquerade_rule()).await,
            Step::ForwardEstablished => {
                self.ensure_firewall_rule(&FirewallRule::forward_established())
                    .await
            }
            Step::ForwardNamespace => self.ensure_firewall_rule(&config.forward_rule()).await,
            Step::DnsConfig => self.ensure_dns().await,
        }
    }

    async fn remove(&self, step: Step) -> Result<Outcome> {
        let config = &self.config;
        let ns = &config.namespace;
        let backend = &self.backend;

        if step.is_shared() {
            return Err(Error::SharedResource {
                resource: step.to_string(),
            });
        }

        tracing::debug!(step = %step, namespace = %ns, "Removing");

        match step {
            Step::Masquerade => self.remove_firewall_rule(&config.masquerade_rule()).await,
            Step::ForwardNamespace => self.remove_firewall_rule(&config.forward_rule()).await,
            Step::PolicyRule => {
                let rule = config.policy_rule();
                if !backend.rule_exists(&rule).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend.delete_rule(&rule).await
            }
            Step::VethPair => {
                if !backend.link_exists(&config.host_veth).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend.delete_link(&config.host_veth).await
            }
            Step::Namespace => {
                if !backend.namespace_exists(ns).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend.delete_namespace(ns).await
            }
            Step::DnsConfig => {
                let dir = config.dns_dir();
                if !backend.dns_dir_exists(&dir).await? {
                    return Ok(Outcome::Unchanged);
                }
                backend.remove_dns_dir(&dir).await
            }
            // Addresses, link state and routes go away with the veth pair
            // and the namespace
            Step::Loopback
            | Step::HostAddress
            | Step::HostLinkUp
            | Step::NamespaceAddress
            | Step::NamespaceLinkUp
            | Step::DefaultRoute
            | Step::ForwardEstablished => Ok(Outcome::Unchanged),
        }
    }

    async fn ensure_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome> {
        if self.backend.firewall_rule_exists(rule).await? {
            return Ok(Outcome::Unchanged);
        }
        self.backend.append_firewall_rule(rule).await
    }

    async fn remove_firewall_rule(&self, rule: &FirewallRule) -> Result<Outcome> {
        if !self.backend.firewall_rule_exists(rule).await? {
            return Ok(Outcome::Unchanged);
        }
        self.backend.delete_firewall_rule(rule).await
    }

    async fn ensure_dns(&self) -> Result<Outcome> {
        let dir = self.config.dns_dir();

        let outcome = match self.backend.create_dns_dir(&dir).await? {
            // The resolver is copied again either way
            Outcome::AlreadyPresent => Outcome::Applied,
            other => other,
        };

        if let Err(e) = self
            .backend
            .copy_resolver(&self.config.resolv_conf, &dir)
            .await
        {
            tracing::warn!(
                source = %self.config.resolv_conf.display(),
                dir = %dir.display(),
                error = %e,
                "Failed to copy resolver configuration"
            );
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
