use std::fs;
use std::path::PathBuf;

use netpol_core::model::{Peer, PortSpec, Protocol, RuleAction};
use netpol_core::{parse, parse_stream, Dialect, Direction, ParseErrorReason};

fn fixture(path: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path);
    fs::read_to_string(&path).expect("fixture should be readable")
}

#[test]
fn parses_kubernetes_fixture() {
    let doc = parse(
        &fixture("fixtures/policies/k8s/frontend-allow.yaml"),
        Dialect::Kubernetes,
    )
    .expect("parse should succeed");
    assert_eq!(doc.qualified_name(), "shop/allow-frontend");
    assert_eq!(doc.source_dialect, Dialect::Kubernetes);
    assert_eq!(doc.ingress.len(), 1);
    assert_eq!(doc.ingress[0].ports[0].protocol, Protocol::Tcp);
    assert_eq!(doc.ingress[0].ports[0].port, PortSpec::Number(80));
}

#[test]
fn ip_block_except_is_kept() {
    let doc = parse(
        &fixture("fixtures/policies/k8s/ipblock-except.yaml"),
        Dialect::Kubernetes,
    )
    .expect("parse should succeed");
    match &doc.ingress[0].peers[..] {
        [Peer::Cidr(block)] => {
            assert_eq!(block.cidr.to_string(), "192.168.0.0/16");
            assert_eq!(block.except.len(), 1);
        }
        other => panic!("unexpected peers {other:?}"),
    }
}

#[test]
fn declared_direction_without_rules_is_default_deny() {
    let doc = parse(
        &fixture("fixtures/policies/k8s/default-deny-egress.yaml"),
        Dialect::Kubernetes,
    )
    .expect("parse should succeed");
    assert!(doc.declares(Direction::Egress));
    assert!(doc.egress.is_empty());
}

#[test]
fn calico_actions_and_order_are_tagged() {
    let doc = parse(
        &fixture("fixtures/policies/calico/ordered.yaml"),
        Dialect::Calico,
    )
    .expect("parse should succeed");
    let actions: Vec<RuleAction> = doc.ingress.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![RuleAction::Log, RuleAction::Deny, RuleAction::Allow]
    );
    assert_eq!(doc.order, Some(200.0));
    assert_eq!(doc.pod_selector.pods.expressions.len(), 1);
}

#[test]
fn unsupported_calico_selector_is_rejected() {
    let err = parse(
        &fixture("fixtures/policies/calico/unsupported.yaml"),
        Dialect::Calico,
    )
    .expect_err("disjunction should be rejected");
    assert_eq!(err.reason, ParseErrorReason::UnsupportedField);
    assert_eq!(err.path, "spec.selector");
}

#[test]
fn stream_detects_dialect_per_document() {
    let docs = parse_stream(&fixture("fixtures/policies/k8s/mixed.yaml"), None);
    assert_eq!(docs.len(), 2);
    assert!(docs
        .iter()
        .all(|d| d.dialect == Some(Dialect::Kubernetes) && d.result.is_ok()));
}

#[test]
fn requested_dialect_must_match_document() {
    let err = parse(
        &fixture("fixtures/policies/cilium/l7.yaml"),
        Dialect::Kubernetes,
    )
    .expect_err("dialect mismatch");
    assert_eq!(err.reason, ParseErrorReason::SchemaViolation);
}
