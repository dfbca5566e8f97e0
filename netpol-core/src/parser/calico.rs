use std::collections::BTreeSet;

use serde_yaml::Value;

use super::calico_selector::parse_selector;
use super::{
    from_value, index, join, parse_cidr, port_number, reject_extra, ParseError, Parser,
};
use crate::cidr::Cidr;
use crate::manifest::{CalicoEntityRule, CalicoPolicy, CalicoRule, IntOrString};
use crate::model::{
    CidrBlock, Dialect, Direction, LabelMatch, LabelRequirement, Peer, PolicyDocument,
    PolicySelector, PortRule, PortSpec, Protocol, RuleAction, TrafficRule, WorkloadKind,
};

const CALICO_NAMESPACE_NAME: &str = "projectcalico.org/name";
const CALICO_ENDPOINT_NAMESPACE: &str = "projectcalico.org/namespace";
const K8S_NAMESPACE_NAME: &str = "kubernetes.io/metadata.name";

/// Reads Calico `NetworkPolicy` and `GlobalNetworkPolicy` documents.
pub struct CalicoParser;

impl Parser for CalicoParser {
    fn parse_value(&self, value: Value) -> Result<PolicyDocument, ParseError> {
        let policy: CalicoPolicy = from_value(value)?;
        parse_policy(policy)
    }
}

fn parse_policy(policy: CalicoPolicy) -> Result<PolicyDocument, ParseError> {
    let name = policy
        .metadata
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseError::schema("metadata.name", "policy has no name"))?;
    let global = policy.kind == "GlobalNetworkPolicy";
    let spec = policy.spec;
    reject_extra(&spec.extra, "spec")?;

    let namespace = if global {
        None
    } else {
        Some(
            policy
                .metadata
                .namespace
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "default".to_string()),
        )
    };

    let pods = parse_selector(spec.selector.as_deref().unwrap_or_default(), "spec.selector")?;
    let namespaces = match (&spec.namespace_selector, global) {
        (Some(raw), true) => Some(namespace_match(parse_selector(raw, "spec.namespaceSelector")?)),
        (Some(_), false) => {
            return Err(ParseError::schema(
                "spec.namespaceSelector",
                "namespaceSelector is only valid on GlobalNetworkPolicy",
            ))
        }
        (None, _) => None,
    };
    let pod_selector = fold_endpoint_namespace(pods, namespaces);

    let mut ingress = Vec::new();
    for (i, rule) in spec.ingress.iter().flatten().enumerate() {
        ingress.push(parse_rule(rule, Direction::Ingress, &index("spec.ingress", i))?);
    }
    let mut egress = Vec::new();
    for (i, rule) in spec.egress.iter().flatten().enumerate() {
        egress.push(parse_rule(rule, Direction::Egress, &index("spec.egress", i))?);
    }

    let policy_types = match spec.types.as_deref() {
        Some(types) if !types.is_empty() => types
            .iter()
            .enumerate()
            .map(|(i, raw)| match raw.as_str() {
                "Ingress" => Ok(Direction::Ingress),
                "Egress" => Ok(Direction::Egress),
                other => Err(ParseError::schema(
                    index("spec.types", i),
                    format!("unknown policy type '{other}'"),
                )),
            })
            .collect::<Result<BTreeSet<_>, _>>()?,
        _ => default_types(!ingress.is_empty(), !egress.is_empty()),
    };
    for (direction, rules) in [(Direction::Ingress, &ingress), (Direction::Egress, &egress)] {
        if !rules.is_empty() && !policy_types.contains(&direction) {
            return Err(ParseError::schema(
                format!("spec.{direction}"),
                format!("{direction} rules present but {direction} is not in types"),
            ));
        }
    }

    Ok(PolicyDocument {
        name,
        namespace,
        labels: policy.metadata.labels,
        annotations: policy.metadata.annotations,
        workload: WorkloadKind::Pods,
        pod_selector,
        policy_types,
        ingress,
        egress,
        source_dialect: Dialect::Calico,
        kind: policy.kind,
        order: spec.order,
        tier: spec.tier,
    })
}

/// Calico's defaulting when `types` is absent: Ingress unless the policy has
/// only egress rules, Egress whenever it has egress rules.
fn default_types(has_ingress: bool, has_egress: bool) -> BTreeSet<Direction> {
    let mut types = BTreeSet::new();
    if has_ingress || !has_egress {
        types.insert(Direction::Ingress);
    }
    if has_egress {
        types.insert(Direction::Egress);
    }
    types
}

fn parse_rule(rule: &CalicoRule, direction: Direction, path: &str) -> Result<TrafficRule, ParseError> {
    reject_extra(&rule.extra, path)?;
    let action = match rule.action.to_ascii_lowercase().as_str() {
        "allow" => RuleAction::Allow,
        "deny" => RuleAction::Deny,
        "pass" => RuleAction::Pass,
        "log" => RuleAction::Log,
        other => {
            return Err(ParseError::schema(
                join(path, "action"),
                format!("unknown action '{other}'"),
            ))
        }
    };
    let protocol = rule
        .protocol
        .as_ref()
        .map(|raw| protocol(raw, &join(path, "protocol")))
        .transpose()?;

    let source = rule.source.clone().unwrap_or_default();
    let destination = rule.destination.clone().unwrap_or_default();
    let source_path = join(path, "source");
    let destination_path = join(path, "destination");
    reject_extra(&source.extra, &source_path)?;
    reject_extra(&destination.extra, &destination_path)?;

    if !source.ports.is_empty() {
        return Err(ParseError::unsupported(
            join(&source_path, "ports"),
            "source ports cannot be expressed in Cilium",
        ));
    }
    let (peer_rule, peer_path, local_rule, local_path) = match direction {
        Direction::Ingress => (&source, &source_path, &destination, &destination_path),
        Direction::Egress => (&destination, &destination_path, &source, &source_path),
    };
    if local_rule.has_peer_fields() {
        return Err(ParseError::unsupported(
            local_path.clone(),
            format!("{direction} rules cannot narrow the policy's own endpoints"),
        ));
    }

    let peers = peers(peer_rule, peer_path)?;
    let ports = ports(protocol, &destination.ports, &join(&destination_path, "ports"))?;
    Ok(TrafficRule {
        action,
        peers,
        ports,
        l7: None,
    })
}

fn protocol(raw: &IntOrString, path: &str) -> Result<Protocol, ParseError> {
    let parsed = match raw {
        IntOrString::Int(6) => Some(Protocol::Tcp),
        IntOrString::Int(17) => Some(Protocol::Udp),
        IntOrString::Int(132) => Some(Protocol::Sctp),
        IntOrString::Int(_) => None,
        IntOrString::String(s) => Protocol::parse(s).filter(|p| *p != Protocol::Any),
    };
    parsed.ok_or_else(|| {
        let shown = match raw {
            IntOrString::Int(n) => n.to_string(),
            IntOrString::String(s) => s.clone(),
        };
        ParseError::unsupported(path, format!("protocol {shown} cannot be converted"))
    })
}

fn ports(
    protocol: Option<Protocol>,
    raw: &[IntOrString],
    path: &str,
) -> Result<Vec<PortRule>, ParseError> {
    match protocol {
        None if raw.is_empty() => Ok(Vec::new()),
        None => Err(ParseError::schema(
            path,
            "ports require protocol TCP, UDP or SCTP",
        )),
        Some(protocol) if raw.is_empty() => Ok(vec![PortRule::new(protocol, PortSpec::Any)]),
        Some(protocol) => raw
            .iter()
            .enumerate()
            .map(|(i, port)| port_spec(port, &index(path, i)).map(|p| PortRule::new(protocol, p)))
            .collect(),
    }
}

/// Calico ports are numbers, `"start:end"` ranges or named ports.
fn port_spec(raw: &IntOrString, path: &str) -> Result<PortSpec, ParseError> {
    let text = match raw {
        IntOrString::Int(n) => return port_number(*n, path).map(PortSpec::Number),
        IntOrString::String(s) => s.trim(),
    };
    if let Some((start, end)) = text.split_once(':') {
        let bound = |s: &str| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| ParseError::schema(path, format!("invalid port range '{text}'")))
                .and_then(|n| port_number(n, path))
        };
        let (start, end) = (bound(start)?, bound(end)?);
        return match start.cmp(&end) {
            std::cmp::Ordering::Less => Ok(PortSpec::Range(start, end)),
            std::cmp::Ordering::Equal => Ok(PortSpec::Number(start)),
            std::cmp::Ordering::Greater => Err(ParseError::schema(
                path,
                format!("port range '{text}' is reversed"),
            )),
        };
    }
    match text.parse::<i64>() {
        Ok(n) => port_number(n, path).map(PortSpec::Number),
        Err(_) if text.is_empty() => Err(ParseError::schema(path, "empty port")),
        Err(_) => Ok(PortSpec::Named(text.to_string())),
    }
}

fn peers(entity: &CalicoEntityRule, path: &str) -> Result<Vec<Peer>, ParseError> {
    let has_selector = entity.selector.is_some() || entity.namespace_selector.is_some();
    let has_nets = !entity.nets.is_empty() || !entity.not_nets.is_empty();
    if has_selector && has_nets {
        return Err(ParseError::unsupported(
            path,
            "a selector combined with nets cannot be expressed as one Cilium peer",
        ));
    }
    if has_selector {
        let pods = match &entity.selector {
            Some(raw) => parse_selector(raw, &join(path, "selector"))?,
            None => LabelMatch::default(),
        };
        let namespaces = entity
            .namespace_selector
            .as_deref()
            .map(|raw| parse_selector(raw, &join(path, "namespaceSelector")).map(namespace_match))
            .transpose()?;
        return Ok(vec![Peer::Endpoints(fold_endpoint_namespace(pods, namespaces))]);
    }
    if has_nets {
        return net_peers(entity, path).map(|blocks| blocks.into_iter().map(Peer::Cidr).collect());
    }
    Ok(Vec::new())
}

/// `nets` become CIDR peers and each `notNets` entry is attached as an
/// `except` to the net containing it.
fn net_peers(entity: &CalicoEntityRule, path: &str) -> Result<Vec<CidrBlock>, ParseError> {
    let mut blocks = entity
        .nets
        .iter()
        .enumerate()
        .map(|(i, raw)| parse_cidr(raw, &index(&join(path, "nets"), i)).map(CidrBlock::new))
        .collect::<Result<Vec<_>, _>>()?;
    let implicit = blocks.is_empty();

    for (i, raw) in entity.not_nets.iter().enumerate() {
        let not_path = index(&join(path, "notNets"), i);
        let excluded: Cidr = parse_cidr(raw, &not_path)?;
        if implicit && !blocks.iter().any(|b| b.cidr.is_ipv4() == excluded.is_ipv4()) {
            blocks.push(CidrBlock::new(Cidr::any_of_family(&excluded)));
        }
        let Some(block) = blocks
            .iter_mut()
            .find(|b| excluded.is_proper_subnet_of(&b.cidr))
        else {
            return Err(ParseError::unsupported(
                not_path,
                format!("{excluded} is not inside any of the rule's nets"),
            ));
        };
        block.except.push(excluded);
    }
    Ok(blocks)
}

/// Rewrite Calico's namespace name label to the Kubernetes one.
fn namespace_match(mut selector: LabelMatch) -> LabelMatch {
    if let Some(value) = selector.labels.remove(CALICO_NAMESPACE_NAME) {
        selector.labels.insert(K8S_NAMESPACE_NAME.to_string(), value);
    }
    let expressions = selector
        .expressions
        .into_iter()
        .map(|req| {
            if req.key == CALICO_NAMESPACE_NAME {
                LabelRequirement {
                    key: K8S_NAMESPACE_NAME.to_string(),
                    ..req
                }
            } else {
                req
            }
        })
        .collect();
    LabelMatch::new(selector.labels, expressions)
}

/// Move `projectcalico.org/namespace == 'x'` out of an endpoint selector and
/// into its namespace scope.
fn fold_endpoint_namespace(mut pods: LabelMatch, namespaces: Option<LabelMatch>) -> PolicySelector {
    let Some(ns) = pods.labels.remove(CALICO_ENDPOINT_NAMESPACE) else {
        return PolicySelector { pods, namespaces };
    };
    let mut scope = namespaces.unwrap_or_default();
    scope.labels.insert(K8S_NAMESPACE_NAME.to_string(), ns);
    PolicySelector {
        pods,
        namespaces: Some(scope),
    }
}

#[cfg(test)]
mod tests {
    use super::CalicoParser;
    use crate::model::{Direction, Peer, PortSpec, Protocol, RuleAction};
    use crate::parser::{ParseErrorReason, Parser};

    fn parse(raw: &str) -> Result<crate::model::PolicyDocument, crate::parser::ParseError> {
        CalicoParser.parse_value(serde_yaml::from_str(raw).expect("yaml"))
    }

    #[test]
    fn ingress_peers_come_from_source_and_ports_from_destination() {
        let doc = parse(
            r#"
apiVersion: projectcalico.org/v3
kind: NetworkPolicy
metadata: {name: allow-api, namespace: shop}
spec:
  order: 100
  selector: app == 'api'
  ingress:
    - action: Allow
      protocol: TCP
      source:
        selector: role == 'frontend'
        namespaceSelector: projectcalico.org/name == 'web'
      destination:
        ports: [8080, "9000:9010"]
    - action: Deny
"#,
        )
        .expect("parse");
        assert_eq!(doc.order, Some(100.0));
        assert_eq!(doc.policy_types.len(), 1);
        let rule = &doc.ingress[0];
        match &rule.peers[0] {
            Peer::Endpoints(sel) => {
                assert_eq!(sel.pods.labels["role"], "frontend");
                let ns = sel.namespaces.as_ref().expect("namespace scope");
                assert_eq!(ns.labels["kubernetes.io/metadata.name"], "web");
            }
            other => panic!("unexpected peer {other:?}"),
        }
        assert_eq!(rule.ports[0].protocol, Protocol::Tcp);
        assert_eq!(rule.ports[1].port, PortSpec::Range(9000, 9010));
        assert_eq!(doc.ingress[1].action, RuleAction::Deny);
    }

    #[test]
    fn not_nets_attach_to_containing_net() {
        let doc = parse(
            r#"
apiVersion: projectcalico.org/v3
kind: GlobalNetworkPolicy
metadata: {name: egress-out}
spec:
  selector: all()
  types: [Egress]
  egress:
    - action: Allow
      destination:
        nets: [10.0.0.0/8, 192.168.0.0/16]
        notNets: [192.168.1.0/24]
    - action: Allow
      destination:
        notNets: [172.16.0.0/12]
"#,
        )
        .expect("parse");
        assert!(doc.is_clusterwide());
        assert!(doc.declares(Direction::Egress));
        assert!(!doc.declares(Direction::Ingress));
        match &doc.egress[0].peers[1] {
            Peer::Cidr(block) => assert_eq!(block.except.len(), 1),
            other => panic!("unexpected peer {other:?}"),
        }
        match &doc.egress[1].peers[0] {
            Peer::Cidr(block) => {
                assert_eq!(block.cidr.to_string(), "0.0.0.0/0");
                assert_eq!(block.except[0].to_string(), "172.16.0.0/12");
            }
            other => panic!("unexpected peer {other:?}"),
        }
    }

    #[test]
    fn types_default_from_rule_sections() {
        let cases: [(&str, &[Direction]); 4] = [
            ("", &[Direction::Ingress]),
            ("  ingress: [{action: Allow}]\n", &[Direction::Ingress]),
            ("  egress: [{action: Allow}]\n", &[Direction::Egress]),
            (
                "  ingress: [{action: Allow}]\n  egress: [{action: Allow}]\n",
                &[Direction::Ingress, Direction::Egress],
            ),
        ];
        for (rules, expected) in cases {
            let raw = format!(
                "apiVersion: projectcalico.org/v3\nkind: NetworkPolicy\nmetadata: {{name: p, namespace: x}}\nspec:\n  selector: app == 'web'\n{rules}"
            );
            let doc = parse(&raw).expect("parse");
            let types: Vec<Direction> = doc.policy_types.iter().copied().collect();
            assert_eq!(types, expected, "{rules}");
        }
    }

    #[test]
    fn rejects_untranslatable_rules() {
        let cases = [
            ("ingress: [{action: Allow, protocol: ICMP}]", ParseErrorReason::UnsupportedField),
            (
                "ingress: [{action: Allow, source: {selector: a == 'b', nets: [10.0.0.0/8]}}]",
                ParseErrorReason::UnsupportedField,
            ),
            (
                "ingress: [{action: Allow, destination: {selector: a == 'b'}}]",
                ParseErrorReason::UnsupportedField,
            ),
            (
                "egress: [{action: Allow, destination: {nets: [10.0.0.0/8], notNets: [11.0.0.0/8]}}]",
                ParseErrorReason::UnsupportedField,
            ),
            (
                "ingress: [{action: Allow, destination: {ports: [80]}}]",
                ParseErrorReason::SchemaViolation,
            ),
            ("ingress: [{action: Reject}]", ParseErrorReason::SchemaViolation),
            (
                "ingress: [{action: Allow, source: {selector: a == 'b' || c == 'd'}}]",
                ParseErrorReason::UnsupportedField,
            ),
            ("doNotTrack: true", ParseErrorReason::UnsupportedField),
        ];
        for (body, reason) in cases {
            let raw = format!(
                "apiVersion: projectcalico.org/v3\nkind: NetworkPolicy\nmetadata: {{name: p, namespace: x}}\nspec:\n  {body}\n"
            );
            let err = parse(&raw).expect_err(body);
            assert_eq!(err.reason, reason, "{body}: {err}");
        }
    }
}
