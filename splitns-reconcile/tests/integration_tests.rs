use std::net::Ipv4Addr;
use std::sync::Arc;
use splitns_core::{Outcome, Step};
use splitns_net::{FirewallRule, MockBackend, NetworkBackend, PolicyRule};
use splitns_reconcile::*;

const NS_IP: Ipv4Addr = Ipv4Addr::new(10, 99, 99, 5);

fn reconciler(backend: &MockBackend) -> Reconciler {
    Reconciler::new(TopologyConfig::default(), Arc::new(backend.clone())).unwrap()
}

fn outcome_of(reports: &[splitns_core::StepReport], step: Step) -> Outcome {
    reports
        .iter()
        .find(|r| r.step == step)
        .map(|r| r.outcome)
        .unwrap()
}

#[tokio::test]
async fn test_setup_builds_topology() {
    let backend = MockBackend::new();
    reconciler(&backend).setup().await.unwrap();

    assert!(backend.has_namespace("home").await);
    assert!(backend.link_is_up(Some("home"), "lo").await);
    assert!(backend.link_is_up(None, "to-home").await);
    assert!(backend.link_is_up(Some("home"), "from-home").await);
    assert_eq!(
        backend.addresses(None, "to-home").await,
        vec!["10.99.99.1/24".parse().unwrap()]
    );
    assert_eq!(
        backend.addresses(Some("home"), "from-home").await,
        vec!["10.99.99.5/24".parse().unwrap()]
    );
    assert_eq!(
        backend.default_route("home").await,
        Some(Ipv4Addr::new(10, 99, 99, 1))
    );
    assert_eq!(backend.rules().await, vec![PolicyRule::main_table(NS_IP, 100)]);
    assert_eq!(
        backend.firewall_rules().await,
        vec![
            FirewallRule::masquerade(NS_IP),
            FirewallRule::forward_established(),
            FirewallRule::forward_from(NS_IP),
        ]
    );
    assert_eq!(
        backend
            .dns_dir(std::path::Path::new("/etc/netns/home"))
            .await,
        Some(Some("/etc/resolv.conf".into()))
    );
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    let backend = MockBackend::new();
    let reconciler = reconciler(&backend);

    reconciler.setup().await.unwrap();
    let rules = backend.rules().await;
    let firewall = backend.firewall_rules().await;

    let second = reconciler.setup().await.unwrap();

    // No duplicates anywhere
    assert_eq!(backend.rules().await, rules);
    assert_eq!(backend.firewall_rules().await, firewall);
    assert_eq!(backend.addresses(None, "to-home").await.len(), 1);

    // Guarded steps don't touch the host, address and route adds are tolerated
    assert_eq!(outcome_of(&second, Step::Namespace), Outcome::Unchanged);
    assert_eq!(outcome_of(&second, Step::VethPair), Outcome::Unchanged);
    assert_eq!(outcome_of(&second, Step::HostAddress), Outcome::AlreadyPresent);
    assert_eq!(outcome_of(&second, Step::DefaultRoute), Outcome::AlreadyPresent);
    assert_eq!(outcome_of(&second, Step::PolicyRule), Outcome::Unchanged);
    assert_eq!(outcome_of(&second, Step::Masquerade), Outcome::Unchanged);
    assert_eq!(outcome_of(&second, Step::ForwardEstablished), Outcome::Unchanged);
    assert_eq!(outcome_of(&second, Step::ForwardNamespace), Outcome::Unchanged);
    assert!(second.iter().all(|r| r.outcome != Outcome::Created));
}

#[tokio::test]
async fn test_cleanup_removes_everything_but_shared_rule() {
    let backend = MockBackend::new();
    let reconciler = reconciler(&backend);

    reconciler.setup().await.unwrap();
    let reports = reconciler.cleanup().await.unwrap();

    assert!(reports.iter().all(|r| r.outcome == Outcome::Removed));
    assert!(!backend.has_namespace("home").await);
    assert!(!backend.has_link(None, "to-home").await);
    assert!(backend.rules().await.is_empty());
    assert_eq!(
        backend.firewall_rules().await,
        vec![FirewallRule::forward_established()]
    );
    assert_eq!(
        backend
            .dns_dir(std::path::Path::new("/etc/netns/home"))
            .await,
        None
    );
}

#[tokio::test]
async fn test_cleanup_preserves_preexisting_shared_rule() {
    let backend = MockBackend::new();
    backend
        .seed_firewall_rule(FirewallRule::forward_established())
        .await;

    let reconciler = reconciler(&backend);
    let reports = reconciler.setup().await.unwrap();
    assert_eq!(
        outcome_of(&reports, Step::ForwardEstablished),
        Outcome::Unchanged
    );

    reconciler.cleanup().await.unwrap();
    reconciler.cleanup().await.unwrap();

    assert_eq!(
        backend.firewall_rules().await,
        vec![FirewallRule::forward_established()]
    );
}

#[tokio::test]
async fn test_cleanup_on_clean_host_is_noop() {
    let backend = MockBackend::new();
    let reports = reconciler(&backend).cleanup().await.unwrap();

    assert!(reports.iter().all(|r| r.outcome == Outcome::Unchanged));
    assert_eq!(backend.mutation_count().await, 0);
}

#[tokio::test]
async fn test_cleanup_after_partial_setup() {
    let backend = MockBackend::new();
    let reconciler = reconciler(&backend);

    backend.fail_on("add_rule", "RTNETLINK answers: Invalid argument").await;
    assert!(reconciler.setup().await.is_err());

    let reports = reconciler.cleanup().await.unwrap();
    assert_eq!(outcome_of(&reports, Step::Masquerade), Outcome::Unchanged);
    assert_eq!(outcome_of(&reports, Step::PolicyRule), Outcome::Unchanged);
    assert_eq!(outcome_of(&reports, Step::VethPair), Outcome::Removed);
    assert_eq!(outcome_of(&reports, Step::Namespace), Outcome::Removed);
    assert!(!backend.has_namespace("home").await);
}

#[tokio::test]
async fn test_status_short_circuits_on_absent_namespace() {
    let backend = MockBackend::new();
    let report = reconciler(&backend).status().await.unwrap();

    assert!(!report.namespace_present);
    assert!(report.veth_present.is_none());
    assert!(report.connectivity.is_none());
    assert_eq!(backend.mutation_count().await, 0);
}

#[tokio::test]
async fn test_status_after_setup() {
    let backend = MockBackend::new();
    let reconciler = reconciler(&backend);

    reconciler.setup().await.unwrap();
    let before = backend.mutation_count().await;

    let report = reconciler.status().await.unwrap();
    assert!(report.resources_present());
    assert_eq!(report.connectivity, Some(true));

    // Status is read-only
    assert_eq!(backend.mutation_count().await, before);
}

#[tokio::test]
async fn test_status_reports_each_check_independently() {
    let backend = MockBackend::new();
    let reconciler = reconciler(&backend);

    reconciler.setup().await.unwrap();
    backend
        .delete_firewall_rule(&FirewallRule::masquerade(NS_IP))
        .await
        .unwrap();
    backend.set_unreachable(true).await;

    let report = reconciler.status().await.unwrap();
    assert_eq!(report.veth_present, Some(true));
    assert_eq!(report.policy_rule_present, Some(true));
    assert_eq!(report.masquerade_present, Some(false));
    assert_eq!(report.connectivity, Some(false));
    assert!(!report.resources_present());
}

#[tokio::test]
async fn test_setup_failure_aborts_without_rollback() {
    let backend = MockBackend::new();
    backend
        .fail_on("create_veth_pair", "RTNETLINK answers: Operation not permitted")
        .await;

    let result = reconciler(&backend).setup().await;
    assert!(result.is_err());

    // Earlier steps stay, later steps never ran
    assert!(backend.has_namespace("home").await);
    assert!(backend.rules().await.is_empty());
    assert!(backend.firewall_rules().await.is_empty());
    assert!(
        !backend
            .mutations()
            .await
            .iter()
            .any(|m| m.starts_with("add_address"))
    );
}

#[tokio::test]
async fn test_setup_resumes_after_failure() {
    let backend = MockBackend::new();
    let reconciler = reconciler(&backend);

    backend
        .fail_on("append_firewall_rule", "iptables: Resource temporarily unavailable")
        .await;
    assert!(reconciler.setup().await.is_err());

    let reports = reconciler.setup().await.unwrap();
    assert_eq!(outcome_of(&reports, Step::Namespace), Outcome::Unchanged);
    assert_eq!(outcome_of(&reports, Step::Masquerade), Outcome::Created);
    assert_eq!(backend.firewall_rules().await.len(), 3);
}

#[tokio::test]
async fn test_foreign_policy_rule_survives_cleanup() {
    let backend = MockBackend::new();
    let foreign = PolicyRule::main_table(NS_IP, 5000);
    backend.seed_rule(foreign.clone()).await;

    let reconciler = reconciler(&backend);
    let reports = reconciler.setup().await.unwrap();

    assert_eq!(outcome_of(&reports, Step::PolicyRule), Outcome::Created);
    assert_eq!(
        backend.rules().await,
        vec![foreign.clone(), PolicyRule::main_table(NS_IP, 100)]
    );

    let reports = reconciler.cleanup().await.unwrap();
    assert_eq!(outcome_of(&reports, Step::PolicyRule), Outcome::Removed);
    assert_eq!(backend.rules().await, vec![foreign]);
}

#[tokio::test]
async fn test_tolerates_own_policy_rule_added_externally() {
    let backend = MockBackend::new();
    backend.seed_rule(PolicyRule::main_table(NS_IP, 100)).await;

    let reports = reconciler(&backend).setup().await.unwrap();

    assert_eq!(outcome_of(&reports, Step::PolicyRule), Outcome::Unchanged);
    assert_eq!(backend.rules().await.len(), 1);
}

#[tokio::test]
async fn test_dns_copy_failure_is_not_fatal() {
    let backend = MockBackend::new();
    backend
        .fail_on("copy_resolver", "No such file or directory")
        .await;

    let reports = reconciler(&backend).setup().await.unwrap();

    assert_eq!(outcome_of(&reports, Step::DnsConfig), Outcome::Created);
    assert_eq!(
        backend
            .dns_dir(std::path::Path::new("/etc/netns/home"))
            .await,
        Some(None)
    );
}

#[tokio::test]
async fn test_custom_profile() {
    let backend = MockBackend::new();
    let config = TopologyConfig::new()
        .with_namespace("work".parse().unwrap())
        .with_veth_names("to-work".parse().unwrap(), "from-work".parse().unwrap())
        .with_addresses(
            "10.98.0.1/30".parse().unwrap(),
            "10.98.0.2/30".parse().unwrap(),
        )
        .with_rule_priority(250)
        .with_netns_root("/tmp/netns");

    let reconciler = Reconciler::new(config, Arc::new(backend.clone())).unwrap();
    reconciler.setup().await.unwrap();

    assert!(backend.has_link(Some("work"), "from-work").await);
    assert_eq!(
        backend.rules().await,
        vec![PolicyRule::main_table(Ipv4Addr::new(10, 98, 0, 2), 250)]
    );
    assert!(
        backend
            .dns_dir(std::path::Path::new("/tmp/netns/work"))
            .await
            .is_some()
    );
}

#[test]
fn test_profile_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("work.json");
    std::fs::write(
        &path,
        r#"{"namespace": "work", "probe_target": "9.9.9.9", "probe_timeout_secs": 5}"#,
    )
    .unwrap();

    let config = TopologyConfig::from_json_file(&path).unwrap();
    assert_eq!(config.namespace.as_str(), "work");
    assert_eq!(config.probe_target, Ipv4Addr::new(9, 9, 9, 9));
    assert_eq!(config.host_veth.as_str(), "to-home");
}

#[test]
fn test_profile_from_json_file_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"probe_timeout_secs": 0}"#).unwrap();

    assert!(TopologyConfig::from_json_file(&path).is_err());
    assert!(TopologyConfig::from_json_file(dir.path().join("missing.json")).is_err());
}
