use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::Value;

use super::{
    cidr_block, from_value, index, join, label_match, parse_cidr, port_number, raw_port,
    reject_extra, ParseError, Parser, RawPort,
};
use crate::manifest::cilium::{CiliumRuleView, KIND_CLUSTERWIDE};
use crate::manifest::{CiliumL7Rules, CiliumPolicy, CiliumPortProtocol, CiliumPortRule, LabelSelector};
use crate::model::{
    CidrBlock, Dialect, Direction, Entity, L7Rules, LabelMatch, LabelRequirement, Peer,
    PolicyDocument, PolicySelector, PortRule, PortSpec, Protocol, RuleAction, SelectorOperator,
    TrafficRule, WorkloadKind,
};

/// Label Cilium attaches to every endpoint with its namespace name.
pub const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";
/// Prefix under which Cilium exposes namespace labels on endpoints.
pub const NAMESPACE_LABELS_PREFIX: &str = "io.cilium.k8s.namespace.labels.";
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Reads `cilium.io/v2` CiliumNetworkPolicy and CiliumClusterwideNetworkPolicy.
pub struct CiliumParser;

impl Parser for CiliumParser {
    fn parse_value(&self, value: Value) -> Result<PolicyDocument, ParseError> {
        let policy: CiliumPolicy = from_value(value)?;
        parse_policy(policy)
    }
}

fn parse_policy(policy: CiliumPolicy) -> Result<PolicyDocument, ParseError> {
    let name = policy
        .metadata
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseError::schema("metadata.name", "policy has no name"))?;
    let clusterwide = policy.kind == KIND_CLUSTERWIDE;
    let namespace = if clusterwide {
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
    let spec = policy.spec;
    reject_extra(&spec.extra, "spec")?;

    let (workload, pod_selector) = match (&spec.endpoint_selector, &spec.node_selector) {
        (Some(sel), None) => (
            WorkloadKind::Pods,
            endpoint_selector(sel, "spec.endpointSelector")?,
        ),
        (None, Some(sel)) if clusterwide => (
            WorkloadKind::Nodes,
            PolicySelector::pods(label_match(sel, "spec.nodeSelector")?),
        ),
        (None, Some(_)) => {
            return Err(ParseError::schema(
                "spec.nodeSelector",
                "nodeSelector is only valid on CiliumClusterwideNetworkPolicy",
            ))
        }
        (Some(_), Some(_)) => {
            return Err(ParseError::schema(
                "spec",
                "endpointSelector and nodeSelector are mutually exclusive",
            ))
        }
        (None, None) => {
            return Err(ParseError::schema(
                "spec",
                "one of endpointSelector or nodeSelector is required",
            ))
        }
    };

    let mut policy_types = BTreeSet::new();
    let mut ingress = Vec::new();
    let mut egress = Vec::new();
    let sections = [
        (Direction::Ingress, RuleAction::Allow, "spec.ingress", views(&spec.ingress)),
        (Direction::Ingress, RuleAction::Deny, "spec.ingressDeny", views(&spec.ingress_deny)),
        (Direction::Egress, RuleAction::Allow, "spec.egress", egress_views(&spec.egress)),
        (Direction::Egress, RuleAction::Deny, "spec.egressDeny", egress_views(&spec.egress_deny)),
    ];
    for (direction, action, section, rules) in sections {
        if !rules.is_empty() {
            policy_types.insert(direction);
        }
        for (i, view) in rules.into_iter().enumerate() {
            let path = index(section, i);
            if let Some(rule) = parse_rule(view, direction, action, &path)? {
                match direction {
                    Direction::Ingress => ingress.push(rule),
                    Direction::Egress => egress.push(rule),
                }
            }
        }
    }

    Ok(PolicyDocument {
        name,
        namespace,
        labels: policy.metadata.labels,
        annotations: policy.metadata.annotations,
        workload,
        pod_selector,
        policy_types,
        ingress,
        egress,
        source_dialect: Dialect::Cilium,
        kind: policy.kind,
        order: None,
        tier: None,
    })
}

fn views(rules: &Option<Vec<crate::manifest::CiliumIngressRule>>) -> Vec<CiliumRuleView<'_>> {
    rules.iter().flatten().map(|r| r.view()).collect()
}

fn egress_views(rules: &Option<Vec<crate::manifest::CiliumEgressRule>>) -> Vec<CiliumRuleView<'_>> {
    rules.iter().flatten().map(|r| r.view()).collect()
}

/// Parse one rule. `Ok(None)` is the empty `{}` rule, which only declares
/// the direction.
fn parse_rule(
    view: CiliumRuleView<'_>,
    direction: Direction,
    action: RuleAction,
    path: &str,
) -> Result<Option<TrafficRule>, ParseError> {
    reject_extra(view.extra, path)?;
    let prefix = match direction {
        Direction::Ingress => "from",
        Direction::Egress => "to",
    };

    let mut peers = Vec::new();
    if let Some(selectors) = view.endpoints {
        let field = join(path, &format!("{prefix}Endpoints"));
        non_empty(selectors, &field)?;
        for (i, sel) in selectors.iter().enumerate() {
            peers.push(Peer::Endpoints(endpoint_selector(sel, &index(&field, i))?));
        }
    }
    if let Some(cidrs) = view.cidr {
        let field = join(path, &format!("{prefix}CIDR"));
        non_empty(cidrs, &field)?;
        for (i, raw) in cidrs.iter().enumerate() {
            peers.push(Peer::Cidr(CidrBlock::new(parse_cidr(raw, &index(&field, i))?)));
        }
    }
    if let Some(sets) = view.cidr_set {
        let field = join(path, &format!("{prefix}CIDRSet"));
        non_empty(sets, &field)?;
        for (i, set) in sets.iter().enumerate() {
            let set_path = index(&field, i);
            reject_extra(&set.extra, &set_path)?;
            peers.push(Peer::Cidr(cidr_block(&set.cidr, &set.except, &set_path)?));
        }
    }
    if let Some(entities) = view.entities {
        let field = join(path, &format!("{prefix}Entities"));
        non_empty(entities, &field)?;
        for (i, raw) in entities.iter().enumerate() {
            let entity = Entity::parse(raw).ok_or_else(|| {
                ParseError::unsupported(index(&field, i), format!("unknown entity '{raw}'"))
            })?;
            peers.push(Peer::Entity { entity });
        }
    }

    let (ports, l7) = match view.to_ports {
        Some(entries) => to_ports(entries, &join(path, "toPorts"))?,
        None => (Vec::new(), None),
    };
    if l7.is_some() && action == RuleAction::Deny {
        return Err(ParseError::unsupported(
            join(path, "toPorts"),
            "deny rules cannot carry L7 rules",
        ));
    }

    if peers.is_empty() && view.to_ports.is_none() {
        return Ok(None);
    }
    Ok(Some(TrafficRule {
        action,
        peers,
        ports,
        l7,
    }))
}

fn non_empty<T>(items: &[T], path: &str) -> Result<(), ParseError> {
    if items.is_empty() {
        Err(ParseError::schema(path, "empty list selects nothing"))
    } else {
        Ok(())
    }
}

fn to_ports(
    entries: &[CiliumPortRule],
    path: &str,
) -> Result<(Vec<PortRule>, Option<L7Rules>), ParseError> {
    non_empty(entries, path)?;
    let mut ports = Vec::new();
    let mut l7: Option<Option<L7Rules>> = None;
    for (i, entry) in entries.iter().enumerate() {
        let entry_path = index(path, i);
        reject_extra(&entry.extra, &entry_path)?;
        let raw_ports = entry.ports.as_deref().unwrap_or_default();
        if raw_ports.is_empty() {
            return Err(ParseError::schema(
                join(&entry_path, "ports"),
                "toPorts entry has no ports",
            ));
        }
        for (j, raw) in raw_ports.iter().enumerate() {
            ports.push(port(raw, &index(&join(&entry_path, "ports"), j))?);
        }
        let rules = entry
            .rules
            .as_ref()
            .map(|r| l7_rules(r, &join(&entry_path, "rules")))
            .transpose()?
            .flatten();
        match &l7 {
            None => l7 = Some(rules),
            Some(existing) if *existing == rules => {}
            Some(_) => {
                return Err(ParseError::unsupported(
                    join(&entry_path, "rules"),
                    "toPorts entries with different L7 rules in one rule",
                ))
            }
        }
    }
    Ok((ports, l7.flatten()))
}

fn port(raw: &CiliumPortProtocol, path: &str) -> Result<PortRule, ParseError> {
    reject_extra(&raw.extra, path)?;
    let protocol = match raw.protocol.as_deref() {
        None => Protocol::Any,
        Some(p) => Protocol::parse(p).ok_or_else(|| {
            ParseError::schema(join(path, "protocol"), format!("unknown protocol '{p}'"))
        })?,
    };
    let start = match &raw.port {
        None => None,
        Some(value) => match raw_port(value, &join(path, "port")) {
            Ok(RawPort::Number(n)) => Some(RawPort::Number(n)),
            Ok(RawPort::Named(name)) => Some(RawPort::Named(name)),
            // "0" is Cilium's spelling of every port.
            Err(_) if is_zero(value) => None,
            Err(err) => return Err(err),
        },
    };
    let spec = match (start, raw.end_port) {
        (None, None) => PortSpec::Any,
        (None, Some(_)) | (Some(RawPort::Named(_)), Some(_)) => {
            return Err(ParseError::schema(
                join(path, "endPort"),
                "endPort requires a numeric port",
            ))
        }
        (Some(RawPort::Named(name)), None) => PortSpec::Named(name),
        (Some(RawPort::Number(n)), None) => PortSpec::Number(n),
        (Some(RawPort::Number(n)), Some(end)) => {
            let end = port_number(end, &join(path, "endPort"))?;
            match n.cmp(&end) {
                std::cmp::Ordering::Less => PortSpec::Range(n, end),
                std::cmp::Ordering::Equal => PortSpec::Number(n),
                std::cmp::Ordering::Greater => {
                    return Err(ParseError::schema(
                        join(path, "endPort"),
                        format!("endPort {end} is below port {n}"),
                    ))
                }
            }
        }
    };
    Ok(PortRule::new(protocol, spec))
}

fn is_zero(value: &crate::manifest::IntOrString) -> bool {
    match value {
        crate::manifest::IntOrString::Int(n) => *n == 0,
        crate::manifest::IntOrString::String(s) => s.trim() == "0",
    }
}

fn l7_rules(rules: &CiliumL7Rules, path: &str) -> Result<Option<L7Rules>, ParseError> {
    reject_extra(&rules.extra, path)?;
    let mut found = Vec::new();
    if let Some(http) = &rules.http {
        found.push(L7Rules::Http(http.clone()));
    }
    if let Some(kafka) = &rules.kafka {
        found.push(L7Rules::Kafka(kafka.clone()));
    }
    if let Some(dns) = &rules.dns {
        found.push(L7Rules::Dns(dns.clone()));
    }
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(ParseError::schema(
            path,
            "only one L7 protocol may be set per port rule",
        )),
    }
}

/// Convert an endpoint selector, folding Cilium's namespace labels back into
/// a namespace scope.
pub(crate) fn endpoint_selector(
    selector: &LabelSelector,
    path: &str,
) -> Result<PolicySelector, ParseError> {
    let raw = label_match(selector, path)?;
    let mut pods = BTreeMap::new();
    let mut pod_expressions = Vec::new();
    let mut ns_labels = BTreeMap::new();
    let mut ns_expressions = Vec::new();
    let mut scoped = false;

    for (key, value) in raw.labels {
        let key = strip_source(&key, path)?;
        match namespace_key(&key) {
            Some(ns_key) => {
                scoped = true;
                ns_labels.insert(ns_key, value);
            }
            None => {
                pods.insert(key, value);
            }
        }
    }
    for req in raw.expressions {
        let key = strip_source(&req.key, path)?;
        match namespace_key(&key) {
            Some(ns_key) => {
                scoped = true;
                if key == POD_NAMESPACE_LABEL {
                    match req.operator {
                        SelectorOperator::Exists => continue,
                        SelectorOperator::DoesNotExist => {
                            return Err(ParseError::unsupported(
                                path,
                                format!("DoesNotExist on {POD_NAMESPACE_LABEL} selects no pods"),
                            ))
                        }
                        _ => {}
                    }
                }
                ns_expressions.push(LabelRequirement { key: ns_key, ..req });
            }
            None => pod_expressions.push(LabelRequirement { key, ..req }),
        }
    }

    Ok(PolicySelector {
        pods: LabelMatch::new(pods, pod_expressions),
        namespaces: scoped.then(|| LabelMatch::new(ns_labels, ns_expressions)),
    })
}

fn strip_source(key: &str, path: &str) -> Result<String, ParseError> {
    if let Some(rest) = key.strip_prefix("k8s:").or_else(|| key.strip_prefix("any:")) {
        return Ok(rest.to_string());
    }
    if let Some((source, _)) = key.split_once(':') {
        if matches!(source, "reserved" | "cidr" | "fqdn" | "container" | "unspec") {
            return Err(ParseError::unsupported(
                path,
                format!("label source '{source}' in '{key}' cannot be converted"),
            ));
        }
    }
    Ok(key.to_string())
}

fn namespace_key(key: &str) -> Option<String> {
    if key == POD_NAMESPACE_LABEL {
        return Some(NAMESPACE_NAME_LABEL.to_string());
    }
    key.strip_prefix(NAMESPACE_LABELS_PREFIX).map(ToOwned::to_owned)
}
