use std::collections::BTreeSet;

use serde_yaml::Value;

use super::{
    cidr_block, from_value, index, join, label_match, raw_port, reject_extra, ParseError, Parser,
    RawPort,
};
use crate::manifest::{NetworkPolicy, NetworkPolicyPeer, NetworkPolicyPort};
use crate::model::{
    Dialect, Direction, LabelMatch, Peer, PolicyDocument, PolicySelector, PortRule, PortSpec,
    Protocol, TrafficRule, WorkloadKind,
};

/// Reads `networking.k8s.io/v1` NetworkPolicy documents.
pub struct KubernetesParser;

impl Parser for KubernetesParser {
    fn parse_value(&self, value: Value) -> Result<PolicyDocument, ParseError> {
        let policy: NetworkPolicy = from_value(value)?;
        parse_policy(policy)
    }
}

fn parse_policy(policy: NetworkPolicy) -> Result<PolicyDocument, ParseError> {
    let name = policy
        .metadata
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseError::schema("metadata.name", "policy has no name"))?;
    let namespace = policy
        .metadata
        .namespace
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "default".to_string());
    let spec = policy.spec;
    reject_extra(&spec.extra, "spec")?;

    let selector = spec
        .pod_selector
        .as_ref()
        .ok_or_else(|| ParseError::schema("spec.podSelector", "podSelector is required"))?;
    let pod_selector = PolicySelector::pods(label_match(selector, "spec.podSelector")?);

    let has_egress_rules = spec.egress.as_ref().is_some_and(|rules| !rules.is_empty());
    let policy_types = policy_types(spec.policy_types.as_deref(), has_egress_rules)?;

    let mut ingress = Vec::new();
    for (i, rule) in spec.ingress.iter().flatten().enumerate() {
        let path = index("spec.ingress", i);
        reject_extra(&rule.extra, &path)?;
        ingress.push(TrafficRule::allow(
            peers(rule.from.as_deref(), &join(&path, "from"))?,
            ports(rule.ports.as_deref(), &join(&path, "ports"))?,
        ));
    }
    let mut egress = Vec::new();
    for (i, rule) in spec.egress.iter().flatten().enumerate() {
        let path = index("spec.egress", i);
        reject_extra(&rule.extra, &path)?;
        egress.push(TrafficRule::allow(
            peers(rule.to.as_deref(), &join(&path, "to"))?,
            ports(rule.ports.as_deref(), &join(&path, "ports"))?,
        ));
    }

    for (direction, rules) in [(Direction::Ingress, &ingress), (Direction::Egress, &egress)] {
        if !rules.is_empty() && !policy_types.contains(&direction) {
            return Err(ParseError::schema(
                format!("spec.{direction}"),
                format!("{direction} rules present but {direction} is not in policyTypes"),
            ));
        }
    }

    Ok(PolicyDocument {
        name,
        namespace: Some(namespace),
        labels: policy.metadata.labels,
        annotations: policy.metadata.annotations,
        workload: WorkloadKind::Pods,
        pod_selector,
        policy_types,
        ingress,
        egress,
        source_dialect: Dialect::Kubernetes,
        kind: policy.kind,
        order: None,
        tier: None,
    })
}

/// Explicit `policyTypes`, or Ingress plus Egress when the egress list has
/// at least one rule. An empty `egress: []` does not declare Egress.
fn policy_types(
    declared: Option<&[String]>,
    has_egress_rules: bool,
) -> Result<BTreeSet<Direction>, ParseError> {
    match declared {
        Some(types) if !types.is_empty() => types
            .iter()
            .enumerate()
            .map(|(i, raw)| match raw.as_str() {
                "Ingress" => Ok(Direction::Ingress),
                "Egress" => Ok(Direction::Egress),
                other => Err(ParseError::schema(
                    index("spec.policyTypes", i),
                    format!("unknown policy type '{other}'"),
                )),
            })
            .collect(),
        _ => {
            let mut types = BTreeSet::from([Direction::Ingress]);
            if has_egress_rules {
                types.insert(Direction::Egress);
            }
            Ok(types)
        }
    }
}

fn peers(entries: Option<&[NetworkPolicyPeer]>, path: &str) -> Result<Vec<Peer>, ParseError> {
    entries
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, entry)| peer(entry, &index(path, i)))
        .collect()
}

fn peer(entry: &NetworkPolicyPeer, path: &str) -> Result<Peer, ParseError> {
    reject_extra(&entry.extra, path)?;
    if let Some(block) = &entry.ip_block {
        if entry.pod_selector.is_some() || entry.namespace_selector.is_some() {
            return Err(ParseError::schema(
                path,
                "ipBlock cannot be combined with podSelector or namespaceSelector",
            ));
        }
        return cidr_block(&block.cidr, &block.except, &join(path, "ipBlock")).map(Peer::Cidr);
    }
    if entry.pod_selector.is_none() && entry.namespace_selector.is_none() {
        return Err(ParseError::schema(
            path,
            "peer must set podSelector, namespaceSelector or ipBlock",
        ));
    }
    let pods = match &entry.pod_selector {
        Some(sel) => label_match(sel, &join(path, "podSelector"))?,
        None => LabelMatch::default(),
    };
    let namespaces = entry
        .namespace_selector
        .as_ref()
        .map(|sel| label_match(sel, &join(path, "namespaceSelector")))
        .transpose()?;
    Ok(Peer::Endpoints(PolicySelector { pods, namespaces }))
}

fn ports(entries: Option<&[NetworkPolicyPort]>, path: &str) -> Result<Vec<PortRule>, ParseError> {
    entries
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, entry)| port(entry, &index(path, i)))
        .collect()
}

fn port(entry: &NetworkPolicyPort, path: &str) -> Result<PortRule, ParseError> {
    reject_extra(&entry.extra, path)?;
    let protocol = match entry.protocol.as_deref() {
        None => Protocol::Tcp,
        Some(raw) => match Protocol::parse(raw) {
            Some(p) if p != Protocol::Any => p,
            _ => {
                return Err(ParseError::schema(
                    join(path, "protocol"),
                    format!("unknown protocol '{raw}'"),
                ))
            }
        },
    };
    let spec = match (&entry.port, entry.end_port) {
        (None, None) => PortSpec::Any,
        (None, Some(_)) => {
            return Err(ParseError::schema(
                join(path, "endPort"),
                "endPort requires port",
            ))
        }
        (Some(raw), end) => match (raw_port(raw, &join(path, "port"))?, end) {
            (RawPort::Named(name), None) => PortSpec::Named(name),
            (RawPort::Named(_), Some(_)) => {
                return Err(ParseError::schema(
                    join(path, "endPort"),
                    "endPort requires a numeric port",
                ))
            }
            (RawPort::Number(n), None) => PortSpec::Number(n),
            (RawPort::Number(start), Some(end)) => {
                let end = super::port_number(end, &join(path, "endPort"))?;
                if end < start {
                    return Err(ParseError::schema(
                        join(path, "endPort"),
                        format!("endPort {end} is below port {start}"),
                    ));
                }
                if end == start {
                    PortSpec::Number(start)
                } else {
                    PortSpec::Range(start, end)
                }
            }
        },
    };
    Ok(PortRule::new(protocol, spec))
}

#[cfg(test)]
mod tests {
    use super::KubernetesParser;
    use crate::model::{Direction, Peer, PortSpec, Protocol};
    use crate::parser::{ParseErrorReason, Parser};

    fn parse(raw: &str) -> Result<crate::model::PolicyDocument, crate::parser::ParseError> {
        let value = serde_yaml::from_str(raw).expect("yaml");
        KubernetesParser.parse_value(value)
    }

    #[test]
    fn empty_egress_list_does_not_declare_egress() {
        let doc = parse(
            r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: web}
spec:
  podSelector: {matchLabels: {app: web}}
  ingress: [{}]
  egress: []
"#,
        )
        .expect("parse");
        assert_eq!(doc.namespace.as_deref(), Some("default"));
        assert!(doc.declares(Direction::Ingress));
        assert!(!doc.declares(Direction::Egress));
        assert!(doc.egress.is_empty());
    }

    #[test]
    fn egress_rules_declare_egress_without_policy_types() {
        let doc = parse(
            r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: web}
spec:
  podSelector: {}
  egress:
    - to: [{ipBlock: {cidr: 10.0.0.0/8}}]
"#,
        )
        .expect("parse");
        assert!(doc.declares(Direction::Ingress));
        assert!(doc.declares(Direction::Egress));
        assert_eq!(doc.egress.len(), 1);
    }

    #[test]
    fn missing_from_means_all_peers_and_port_ranges_parse() {
        let doc = parse(
            r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: web, namespace: shop}
spec:
  podSelector: {}
  ingress:
    - ports:
        - port: "8000"
          endPort: 8080
        - protocol: UDP
          port: dns
"#,
        )
        .expect("parse");
        let rule = &doc.ingress[0];
        assert!(rule.peers.is_empty());
        assert_eq!(rule.ports[0].port, PortSpec::Range(8000, 8080));
        assert_eq!(rule.ports[0].protocol, Protocol::Tcp);
        assert_eq!(rule.ports[1].port, PortSpec::Named("dns".to_string()));
    }

    #[test]
    fn pod_and_namespace_selectors_form_one_peer() {
        let doc = parse(
            r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: web, namespace: shop}
spec:
  podSelector: {}
  ingress:
    - from:
        - podSelector: {matchLabels: {app: api}}
          namespaceSelector: {matchLabels: {team: a}}
        - namespaceSelector: {}
"#,
        )
        .expect("parse");
        let peers = &doc.ingress[0].peers;
        assert_eq!(peers.len(), 2);
        match (&peers[0], &peers[1]) {
            (Peer::Endpoints(first), Peer::Endpoints(second)) => {
                assert_eq!(first.pods.labels["app"], "api");
                assert_eq!(
                    first.namespaces.as_ref().map(|n| n.labels["team"].as_str()),
                    Some("a")
                );
                assert_eq!(second.namespaces.as_ref().map(|n| n.is_empty()), Some(true));
            }
            other => panic!("unexpected peers {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_documents() {
        let cases = [
            ("spec: {}", ParseErrorReason::SchemaViolation),
            (
                "spec: {podSelector: {}, ingress: [{from: [{}]}]}",
                ParseErrorReason::SchemaViolation,
            ),
            (
                "spec: {podSelector: {}, ingress: [{from: [{ipBlock: {cidr: 10.0.0.0/8, except: [11.0.0.0/24]}}]}]}",
                ParseErrorReason::SchemaViolation,
            ),
            (
                "spec: {podSelector: {}, policyTypes: [Egress], ingress: [{}]}",
                ParseErrorReason::SchemaViolation,
            ),
            (
                "spec: {podSelector: {matchExpressions: [{key: a, operator: Like}]}}",
                ParseErrorReason::MalformedSelector,
            ),
            (
                "spec: {podSelector: {}, ingress: [{ports: [{port: 0}]}]}",
                ParseErrorReason::SchemaViolation,
            ),
            (
                "spec: {podSelector: {}, ingress: [{from: [{serviceAccount: x}]}]}",
                ParseErrorReason::UnsupportedField,
            ),
        ];
        for (spec, reason) in cases {
            let raw = format!(
                "apiVersion: networking.k8s.io/v1\nkind: NetworkPolicy\nmetadata: {{name: p}}\n{spec}\n"
            );
            let err = parse(&raw).expect_err(spec);
            assert_eq!(err.reason, reason, "{spec}: {err}");
        }
    }
}
