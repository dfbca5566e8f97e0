//! Render target policies as Cilium manifests.
//!
//! Rendering rules that are not one-to-one:
//! - a declared direction without rules becomes `[{}]`, Cilium's
//!   default-deny marker;
//! - a rule without peers or ports allows everything via the `all` entity;
//! - a namespace scope becomes `io.kubernetes.pod.namespace` /
//!   `io.cilium.k8s.namespace.labels.*` requirements on the selector.

use serde_yaml::Value;

use crate::manifest::cilium::API_VERSION;
use crate::manifest::{
    CidrRule, CiliumEgressRule, CiliumIngressRule, CiliumL7Rules, CiliumPolicy, CiliumPolicySpec,
    CiliumPortProtocol, CiliumPortRule, IntOrString, LabelSelector, LabelSelectorRequirement,
    ObjectMeta,
};
use crate::model::{
    Direction, Entity, L7Rules, LabelMatch, LabelRequirement, Peer, PolicySelector, PortRule,
    PortSpec, Protocol, RuleAction, SelectorOperator, TrafficRule, WorkloadKind,
};
use crate::parser::cilium::{NAMESPACE_LABELS_PREFIX, NAMESPACE_NAME_LABEL, POD_NAMESPACE_LABEL};
use crate::translate::TargetPolicy;

/// Build the Cilium manifest for one target policy.
pub fn render(target: &TargetPolicy) -> CiliumPolicy {
    let doc = &target.document;
    let mut spec = CiliumPolicySpec::default();
    match doc.workload {
        WorkloadKind::Pods => spec.endpoint_selector = Some(selector(&doc.pod_selector)),
        WorkloadKind::Nodes => spec.node_selector = Some(label_selector(&doc.pod_selector.pods)),
    }

    if doc.declares(Direction::Ingress) {
        let (allow, deny) = by_action(&doc.ingress);
        spec.ingress = Some(with_default_deny(
            allow.into_iter().map(ingress_rule).collect(),
        ));
        if !deny.is_empty() {
            spec.ingress_deny = Some(deny.into_iter().map(ingress_rule).collect());
        }
    }
    if doc.declares(Direction::Egress) {
        let (allow, deny) = by_action(&doc.egress);
        spec.egress = Some(with_default_deny(
            allow.into_iter().map(egress_rule).collect(),
        ));
        if !deny.is_empty() {
            spec.egress_deny = Some(deny.into_iter().map(egress_rule).collect());
        }
    }

    CiliumPolicy {
        api_version: API_VERSION.to_string(),
        kind: target.kind.as_str().to_string(),
        metadata: ObjectMeta {
            name: Some(doc.name.clone()),
            namespace: doc.namespace.clone(),
            labels: doc.labels.clone(),
            annotations: doc.annotations.clone(),
        },
        spec,
    }
}

/// Render a target straight into a YAML value.
pub fn render_value(target: &TargetPolicy) -> Result<Value, serde_yaml::Error> {
    serde_yaml::to_value(render(target))
}

/// Serialize manifests as one multi-document YAML stream.
pub fn to_yaml(manifests: &[CiliumPolicy]) -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for manifest in manifests {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(manifest)?);
    }
    Ok(out)
}

fn by_action(rules: &[TrafficRule]) -> (Vec<&TrafficRule>, Vec<&TrafficRule>) {
    rules
        .iter()
        .filter(|r| matches!(r.action, RuleAction::Allow | RuleAction::Deny))
        .partition(|r| r.is_allow())
}

fn with_default_deny<T: Default>(mut rules: Vec<T>) -> Vec<T> {
    if rules.is_empty() {
        rules.push(T::default());
    }
    rules
}

struct Rendered {
    endpoints: Option<Vec<LabelSelector>>,
    cidr: Option<Vec<String>>,
    cidr_set: Option<Vec<CidrRule>>,
    entities: Option<Vec<String>>,
    to_ports: Option<Vec<CiliumPortRule>>,
}

fn ingress_rule(rule: &TrafficRule) -> CiliumIngressRule {
    let r = rendered(rule);
    CiliumIngressRule {
        from_endpoints: r.endpoints,
        from_cidr: r.cidr,
        from_cidr_set: r.cidr_set,
        from_entities: r.entities,
        to_ports: r.to_ports,
        ..CiliumIngressRule::default()
    }
}

fn egress_rule(rule: &TrafficRule) -> CiliumEgressRule {
    let r = rendered(rule);
    CiliumEgressRule {
        to_endpoints: r.endpoints,
        to_cidr: r.cidr,
        to_cidr_set: r.cidr_set,
        to_entities: r.entities,
        to_ports: r.to_ports,
        ..CiliumEgressRule::default()
    }
}

fn rendered(rule: &TrafficRule) -> Rendered {
    let mut endpoints = Vec::new();
    let mut cidr = Vec::new();
    let mut cidr_set = Vec::new();
    let mut entities = Vec::new();
    for peer in &rule.peers {
        match peer {
            Peer::Endpoints(sel) => endpoints.push(selector(sel)),
            Peer::Cidr(block) if block.except.is_empty() => cidr.push(block.cidr.to_string()),
            Peer::Cidr(block) => cidr_set.push(CidrRule {
                cidr: block.cidr.to_string(),
                except: block.except.iter().map(ToString::to_string).collect(),
                ..CidrRule::default()
            }),
            Peer::Entity { entity } => entities.push(entity.as_str().to_string()),
        }
    }
    if rule.peers.is_empty() && rule.ports.is_empty() && rule.l7.is_none() {
        entities.push(Entity::All.as_str().to_string());
    }

    Rendered {
        endpoints: non_empty(endpoints),
        cidr: non_empty(cidr),
        cidr_set: non_empty(cidr_set),
        entities: non_empty(entities),
        to_ports: to_ports(&rule.ports, rule.l7.as_ref()),
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn to_ports(ports: &[PortRule], l7: Option<&L7Rules>) -> Option<Vec<CiliumPortRule>> {
    if ports.is_empty() && l7.is_none() {
        return None;
    }
    let mut rendered: Vec<CiliumPortProtocol> = ports.iter().map(port).collect();
    if rendered.is_empty() {
        rendered.push(port(&PortRule::new(Protocol::Any, PortSpec::Any)));
    }
    Some(vec![CiliumPortRule {
        ports: Some(rendered),
        rules: l7.map(l7_rules),
        ..CiliumPortRule::default()
    }])
}

fn port(rule: &PortRule) -> CiliumPortProtocol {
    let (port, end_port) = match &rule.port {
        PortSpec::Any => ("0".to_string(), None),
        PortSpec::Number(n) => (n.to_string(), None),
        PortSpec::Range(start, end) => (start.to_string(), Some(i64::from(*end))),
        PortSpec::Named(name) => (name.clone(), None),
    };
    CiliumPortProtocol {
        port: Some(IntOrString::String(port)),
        end_port,
        protocol: Some(rule.protocol.as_str().to_string()),
        ..CiliumPortProtocol::default()
    }
}

fn l7_rules(l7: &L7Rules) -> CiliumL7Rules {
    let mut rules = CiliumL7Rules::default();
    match l7 {
        L7Rules::Http(http) => rules.http = Some(http.clone()),
        L7Rules::Kafka(kafka) => rules.kafka = Some(kafka.clone()),
        L7Rules::Dns(dns) => rules.dns = Some(dns.clone()),
    }
    rules
}

/// Endpoint selector including the namespace scope, if any.
fn selector(sel: &PolicySelector) -> LabelSelector {
    let mut out = label_selector(&sel.pods);
    let Some(ns) = &sel.namespaces else {
        return out;
    };
    if ns.is_empty() {
        out.match_expressions.push(LabelSelectorRequirement {
            key: POD_NAMESPACE_LABEL.to_string(),
            operator: SelectorOperator::Exists.as_str().to_string(),
            values: Vec::new(),
        });
        return out;
    }
    for (key, value) in &ns.labels {
        out.match_labels.insert(namespace_label(key), value.clone());
    }
    for req in &ns.expressions {
        out.match_expressions.push(requirement(&LabelRequirement {
            key: namespace_label(&req.key),
            ..req.clone()
        }));
    }
    out
}

fn namespace_label(key: &str) -> String {
    if key == NAMESPACE_NAME_LABEL {
        POD_NAMESPACE_LABEL.to_string()
    } else {
        format!("{NAMESPACE_LABELS_PREFIX}{key}")
    }
}

fn label_selector(labels: &LabelMatch) -> LabelSelector {
    LabelSelector {
        match_labels: labels.labels.clone(),
        match_expressions: labels.expressions.iter().map(requirement).collect(),
        ..LabelSelector::default()
    }
}

fn requirement(req: &LabelRequirement) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: req.key.clone(),
        operator: req.operator.as_str().to_string(),
        values: req.values.iter().cloned().collect(),
    }
}
