use splitns_core::*;

#[test]
fn test_namespace_name_validation() {
    // Valid names
    assert!(NamespaceName::new("home").is_ok());
    assert!(NamespaceName::new("home-2").is_ok());
    assert!(NamespaceName::new("split_ns").is_ok());
    assert!(NamespaceName::new("A").is_ok());

    // Invalid names - empty
    assert!(NamespaceName::new("").is_err());

    // Invalid names - too long
    assert!(NamespaceName::new("a".repeat(65)).is_err());

    // Invalid names - would escape /etc/netns
    assert!(NamespaceName::new("..").is_err());
    assert!(NamespaceName::new("home/evil").is_err());
    assert!(NamespaceName::new("home evil").is_err());
}

#[test]
fn test_interface_name_validation() {
    assert!(InterfaceName::new("to-home").is_ok());
    assert!(InterfaceName::new("from-home").is_ok());
    assert!(InterfaceName::new("veth.100").is_ok());

    assert!(InterfaceName::new("").is_err());
    assert!(InterfaceName::new("sixteen-chars-xx").is_err());
    assert!(InterfaceName::new("has space").is_err());
    assert!(InterfaceName::new("a/b").is_err());
}

#[test]
fn test_name_parsing() {
    let ns: NamespaceName = "home".parse().unwrap();
    assert_eq!(ns.as_str(), "home");
    assert_eq!(format!("{ns}"), "home");

    let iface: InterfaceName = "to-home".parse().unwrap();
    assert_eq!(String::from(iface), "to-home");
}

#[test]
fn test_every_cleanup_step_is_a_setup_step() {
    for step in Step::CLEANUP_ORDER {
        assert!(Step::SETUP_ORDER.contains(&step), "{step} not created by setup");
    }
}

#[test]
fn test_setup_order_is_unique() {
    let mut seen = std::collections::HashSet::new();
    for step in Step::SETUP_ORDER {
        assert!(seen.insert(step), "{step} appears twice");
    }
}

#[test]
fn test_step_report_serde() {
    let report = StepReport::new(Step::Masquerade, Outcome::AlreadyPresent);

    let json = serde_json::to_string(&report).unwrap();
    assert_eq!(json, r#"{"step":"masquerade","outcome":"already_present"}"#);

    let back: StepReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}

#[test]
fn test_status_report_roundtrip() {
    let report = StatusReport {
        namespace: NamespaceName::new("home").unwrap(),
        namespace_present: true,
        veth_present: Some(true),
        policy_rule_present: Some(false),
        masquerade_present: Some(true),
        connectivity: None,
    };

    let json = serde_json::to_string(&report).unwrap();
    let back: StatusReport = serde_json::from_str(&json).unwrap();

    assert_eq!(back, report);
    assert!(!back.resources_present());
}

#[test]
fn test_error_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: Error = io.into();

    assert!(matches!(err, Error::Io(_)));
    assert!(err.to_string().contains("missing"));
}
