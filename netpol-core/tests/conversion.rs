use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;

use netpol_core::finding::{FindingCode, Severity};
use netpol_core::pipeline::DocumentOutcome;
use netpol_core::translate::TargetKind;
use netpol_core::{
    convert_text, parse, render, to_yaml, translate, validate, ConversionResult, Dialect,
    TranslateOptions,
};

fn fixture(path: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path);
    fs::read_to_string(&path).expect("fixture should be readable")
}

fn convert(path: &str) -> Vec<DocumentOutcome> {
    convert_text(path, &fixture(path), None, &TranslateOptions::default())
}

fn converted(outcome: &DocumentOutcome) -> &ConversionResult {
    outcome.result().expect("document should convert")
}

fn errors(result: &ConversionResult) -> Vec<String> {
    result
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .map(|f| f.message.clone())
        .collect()
}

#[test]
fn frontend_ingress_converts_to_one_rule_without_findings() {
    let doc = parse(
        &fixture("fixtures/policies/k8s/frontend-allow.yaml"),
        Dialect::Kubernetes,
    )
    .expect("parse");
    let result = translate(&doc);
    assert!(result.findings.is_empty());
    assert!(validate(&doc, &result).is_empty());

    let yaml = to_yaml(&[render(&result.outputs[0])]).expect("yaml");
    let expected = r#"---
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata:
  name: allow-frontend
  namespace: shop
  labels:
    app.kubernetes.io/managed-by: cni-migrate
  annotations:
    cni-migrate.io/source: kubernetes/NetworkPolicy/shop/allow-frontend
spec:
  endpointSelector:
    matchLabels:
      app: api
  ingress:
  - fromEndpoints:
    - matchLabels:
        app: frontend
    toPorts:
    - ports:
      - port: '80'
        protocol: TCP
"#;
    assert_eq!(yaml, expected);
}

#[test]
fn ip_block_with_except_converts_without_errors() {
    let outcomes = convert("fixtures/policies/k8s/ipblock-except.yaml");
    let result = converted(&outcomes[0]);
    assert_eq!(errors(result), Vec::<String>::new());

    let manifest = render(&result.outputs[0]);
    let ingress = manifest.spec.ingress.expect("ingress rules");
    let set = ingress[0].from_cidr_set.as_ref().expect("cidr set");
    assert_eq!(set[0].cidr, "192.168.0.0/16");
    assert_eq!(set[0].except, vec!["192.168.4.0/24".to_string()]);
}

#[test]
fn empty_egress_stays_default_deny() {
    let outcomes = convert("fixtures/policies/k8s/default-deny-egress.yaml");
    let result = converted(&outcomes[0]);
    assert!(result.findings.is_empty(), "{:?}", result.findings);
    assert!(result.outputs[0].document.egress.is_empty());

    let manifest = render(&result.outputs[0]);
    let egress = manifest.spec.egress.expect("egress declared");
    assert_eq!(egress.len(), 1);
    assert_eq!(egress[0], Default::default());
}

#[test]
fn kubernetes_fixtures_never_produce_errors() {
    for path in [
        "fixtures/policies/k8s/frontend-allow.yaml",
        "fixtures/policies/k8s/ipblock-except.yaml",
        "fixtures/policies/k8s/default-deny-egress.yaml",
        "fixtures/policies/k8s/mixed.yaml",
    ] {
        for outcome in convert(path) {
            let result = converted(&outcome);
            assert_eq!(errors(result), Vec::<String>::new(), "{path}");
            assert!(!result.outputs.is_empty(), "{path}");
        }
    }
}

#[test]
fn dns_named_ports_and_splits_are_reported() {
    let outcomes = convert("fixtures/policies/k8s/mixed.yaml");
    let result = converted(&outcomes[0]);
    let codes: Vec<(FindingCode, Severity)> =
        result.findings.iter().map(|f| (f.code, f.severity)).collect();
    assert_eq!(
        codes,
        vec![
            (FindingCode::WellKnownDnsPeer, Severity::Info),
            (FindingCode::UnresolvedNamedPort, Severity::Warning),
            (FindingCode::RuleSplit, Severity::Info),
        ]
    );
    let target = &result.outputs[0];
    assert_eq!(target.document.egress.len(), 3);
    assert_eq!(
        target
            .document
            .labels
            .get("named-port.cni-migrate.io/postgres")
            .map(String::as_str),
        Some("unresolved")
    );
    assert_eq!(target.document.labels.get("team").map(String::as_str), Some("web"));
}

#[test]
fn calico_deny_is_omitted_with_warning() {
    let outcomes = convert("fixtures/policies/calico/ordered.yaml");
    let result = converted(&outcomes[0]);
    let target = &result.outputs[0];
    assert_eq!(target.document.ingress.len(), 1);
    assert_eq!(target.origins[0].source_index, 2);

    let warnings: Vec<FindingCode> = result
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .map(|f| f.code)
        .collect();
    assert!(warnings.contains(&FindingCode::ActionNotRepresentable));
    assert!(warnings.contains(&FindingCode::OrderSensitive));
    assert_eq!(errors(result), Vec::<String>::new());
}

#[test]
fn calico_global_policy_targets_nodes_only_when_enabled() {
    let path = "fixtures/policies/calico/global.yaml";
    let outcomes = convert(path);
    assert_eq!(converted(&outcomes[0]).outputs.len(), 1);

    let options = TranslateOptions {
        host_policies: true,
        ..TranslateOptions::default()
    };
    let outcomes = convert_text(path, &fixture(path), None, &options);
    let result = converted(&outcomes[0]);
    let kinds: Vec<TargetKind> = result.outputs.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TargetKind::CiliumClusterwideNetworkPolicy,
            TargetKind::CiliumClusterwideNetworkPolicy
        ]
    );
    let host = render(&result.outputs[1]);
    assert!(host.spec.node_selector.is_some());
    assert!(host.spec.endpoint_selector.is_none());
    assert_eq!(errors(result), Vec::<String>::new());
    assert!(result
        .findings
        .iter()
        .any(|f| f.code == FindingCode::HostPolicyEmitted && f.severity == Severity::Warning));
}

#[test]
fn kubernetes_empty_egress_list_leaves_egress_open() {
    let raw = r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: web, namespace: shop}
spec:
  podSelector: {matchLabels: {app: web}}
  ingress: [{}]
  egress: []
"#;
    let doc = parse(raw, Dialect::Kubernetes).expect("parse");
    let result = translate(&doc);
    assert!(validate(&doc, &result).is_empty());

    let manifest = render(&result.outputs[0]);
    assert!(manifest.spec.egress.is_none());
    assert_eq!(manifest.spec.ingress.map(|rules| rules.len()), Some(1));
}

#[test]
fn calico_egress_only_policy_leaves_ingress_open() {
    let raw = r#"
apiVersion: projectcalico.org/v3
kind: NetworkPolicy
metadata: {name: web-out, namespace: shop}
spec:
  selector: app == 'web'
  egress:
    - action: Allow
"#;
    let doc = parse(raw, Dialect::Calico).expect("parse");
    let result = translate(&doc);
    assert!(validate(&doc, &result).is_empty());

    let manifest = render(&result.outputs[0]);
    assert!(manifest.spec.ingress.is_none());
    assert_eq!(manifest.spec.egress.map(|rules| rules.len()), Some(1));
}

#[test]
fn converted_output_round_trips_as_cilium_source() {
    for path in [
        "fixtures/policies/k8s/mixed.yaml",
        "fixtures/policies/k8s/ipblock-except.yaml",
        "fixtures/policies/calico/global.yaml",
        "fixtures/policies/cilium/l7.yaml",
    ] {
        for outcome in convert(path) {
            let manifests = outcome.manifests();
            let yaml = to_yaml(&manifests).expect("yaml");
            for again in convert_text("again", &yaml, Some(Dialect::Cilium), &TranslateOptions::default()) {
                let result = converted(&again);
                assert_eq!(errors(result), Vec::<String>::new(), "{path}");
            }
        }
    }
}

#[test]
fn cilium_deny_and_l7_rules_survive() {
    let outcomes = convert("fixtures/policies/cilium/l7.yaml");
    let result = converted(&outcomes[0]);
    assert!(result.findings.is_empty(), "{:?}", result.findings);
    let manifest = render(&result.outputs[0]);
    assert!(manifest.spec.egress_deny.is_some());
    let ingress = manifest.spec.ingress.expect("ingress");
    let ports = ingress[0].to_ports.as_ref().expect("ports");
    assert!(ports[0].rules.as_ref().and_then(|r| r.http.as_ref()).is_some());
}
