//! Intermediate model to Cilium target policies.
//!
//! Translation never fails on a parsed document. Anything Cilium cannot
//! express is omitted with a [`Finding`] explaining why.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::finding::{Finding, FindingCode, Severity};
use crate::manifest::cilium::{KIND_CLUSTERWIDE, KIND_NAMESPACED};
use crate::model::{
    Dialect, Direction, Peer, PeerKind, PolicyDocument, PolicySelector, RuleAction, TrafficRule,
    WorkloadKind,
};

pub mod dns;

pub use dns::DnsOptions;

/// Annotation naming the document a target policy was converted from.
pub const SOURCE_ANNOTATION: &str = "cni-migrate.io/source";
/// Label prefix recording named ports that need manual resolution.
pub const NAMED_PORT_LABEL_PREFIX: &str = "named-port.cni-migrate.io/";
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranslateOptions {
    pub dns: DnsOptions,
    /// Labels added to every produced policy.
    pub output_labels: BTreeMap<String, String>,
    pub annotate_source: bool,
    /// Emit a node policy next to Calico global policies that select every
    /// endpoint. Off by default: Cilium applies it to every node, not only
    /// to the host endpoints Calico knew about.
    pub host_policies: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            dns: DnsOptions::default(),
            output_labels: BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "cni-migrate".to_string(),
            )]),
            annotate_source: true,
            host_policies: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetKind {
    CiliumNetworkPolicy,
    CiliumClusterwideNetworkPolicy,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::CiliumNetworkPolicy => KIND_NAMESPACED,
            TargetKind::CiliumClusterwideNetworkPolicy => KIND_CLUSTERWIDE,
        }
    }
}

impl Display for TargetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a target rule came from. Split rules share `source_index` and
/// differ in `part`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleOrigin {
    pub direction: Direction,
    pub target_index: usize,
    pub source_index: usize,
    pub part: usize,
}

/// One Cilium policy produced from a source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetPolicy {
    pub kind: TargetKind,
    pub document: PolicyDocument,
    pub origins: Vec<RuleOrigin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub source: PolicyDocument,
    pub outputs: Vec<TargetPolicy>,
    pub findings: Vec<Finding>,
}

impl ConversionResult {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// Translate with default options.
pub fn translate(source: &PolicyDocument) -> ConversionResult {
    translate_with_options(source, &TranslateOptions::default())
}

pub fn translate_with_options(source: &PolicyDocument, options: &TranslateOptions) -> ConversionResult {
    let mut findings = Vec::new();
    order_findings(source, &mut findings);

    let mut ingress = Vec::new();
    let mut egress = Vec::new();
    let mut origins = Vec::new();
    let mut named_ports = BTreeSet::new();

    for direction in [Direction::Ingress, Direction::Egress] {
        let target = match direction {
            Direction::Ingress => &mut ingress,
            Direction::Egress => &mut egress,
        };
        for (index, rule) in source.rules(direction).iter().enumerate() {
            if !carries(rule, source, direction, index, &mut findings) {
                continue;
            }
            for name in rule.named_ports() {
                if named_ports.insert(name.to_string()) {
                    findings.push(
                        Finding::warning(
                            FindingCode::UnresolvedNamedPort,
                            format!("named port '{name}' must be resolved against the workload"),
                        )
                        .at(direction, index),
                    );
                }
            }

            let verbatim = dns::is_cluster_dns_rule(rule, source, &options.dns);
            if verbatim {
                findings.push(
                    Finding::info(
                        FindingCode::WellKnownDnsPeer,
                        "cluster DNS rule carried unchanged",
                    )
                    .at(direction, index),
                );
            }
            let parts = split_by_family(rule, !verbatim);
            if parts.len() > 1 {
                findings.push(
                    Finding::info(
                        FindingCode::RuleSplit,
                        format!(
                            "rule mixes selector kinds and was split into {} rules",
                            parts.len()
                        ),
                    )
                    .at(direction, index),
                );
            }
            for (part, rule) in parts.into_iter().enumerate() {
                origins.push(RuleOrigin {
                    direction,
                    target_index: target.len(),
                    source_index: index,
                    part,
                });
                target.push(rule);
            }
            debug!(
                policy = %source.qualified_name(),
                %direction,
                index,
                "translated rule"
            );
        }
    }

    let kind = if source.is_clusterwide() {
        TargetKind::CiliumClusterwideNetworkPolicy
    } else {
        TargetKind::CiliumNetworkPolicy
    };
    let document = PolicyDocument {
        name: source.name.clone(),
        namespace: source.namespace.clone(),
        labels: output_labels(source, options, &named_ports),
        annotations: output_annotations(source, options),
        workload: source.workload,
        pod_selector: source.pod_selector.clone(),
        policy_types: source.policy_types.clone(),
        ingress,
        egress,
        source_dialect: Dialect::Cilium,
        kind: kind.as_str().to_string(),
        order: None,
        tier: None,
    };

    let mut outputs = Vec::new();
    if options.host_policies && selects_all_host_endpoints(source) {
        let host = TargetPolicy {
            kind: TargetKind::CiliumClusterwideNetworkPolicy,
            document: PolicyDocument {
                name: format!("{}-host", source.name),
                workload: WorkloadKind::Nodes,
                pod_selector: PolicySelector::default(),
                ..document.clone()
            },
            origins: origins.clone(),
        };
        findings.push(Finding::warning(
            FindingCode::HostPolicyEmitted,
            format!(
                "emitted node policy {} with nodeSelector {{}}; with host firewall enabled it \
                 default-denies {} on every node, which can lock nodes out",
                host.document.name,
                direction_list(&host.document)
            ),
        ));
        outputs.push(TargetPolicy {
            kind,
            document,
            origins,
        });
        outputs.push(host);
    } else {
        outputs.push(TargetPolicy {
            kind,
            document,
            origins,
        });
    }

    info!(
        policy = %source.qualified_name(),
        dialect = %source.source_dialect,
        outputs = outputs.len(),
        findings = findings.len(),
        "translated policy"
    );
    ConversionResult {
        source: source.clone(),
        outputs,
        findings,
    }
}

/// Decide whether a rule survives translation, recording why when it does not.
fn carries(
    rule: &TrafficRule,
    source: &PolicyDocument,
    direction: Direction,
    index: usize,
    findings: &mut Vec<Finding>,
) -> bool {
    match rule.action {
        RuleAction::Allow => true,
        // Cilium deny policies are order independent and carry over as-is.
        RuleAction::Deny if source.source_dialect == Dialect::Cilium => true,
        RuleAction::Deny | RuleAction::Pass => {
            findings.push(
                Finding::warning(
                    FindingCode::ActionNotRepresentable,
                    format!(
                        "{} rule omitted; ordered {} has no Cilium equivalent",
                        rule.action.as_str(),
                        rule.action.as_str().to_ascii_lowercase()
                    ),
                )
                .at(direction, index),
            );
            false
        }
        RuleAction::Log => {
            findings.push(
                Finding::info(FindingCode::LogActionIgnored, "Log rule omitted")
                    .at(direction, index),
            );
            false
        }
    }
}

fn order_findings(source: &PolicyDocument, findings: &mut Vec<Finding>) {
    let tiered = source.tier.as_deref().is_some_and(|t| t != "default");
    if source.order.is_none() && !tiered {
        return;
    }
    let ordered_actions = [Direction::Ingress, Direction::Egress]
        .into_iter()
        .flat_map(|d| source.rules(d))
        .any(|r| matches!(r.action, RuleAction::Deny | RuleAction::Pass));
    let what = match (source.order, source.tier.as_deref()) {
        (Some(order), Some(tier)) if tiered => format!("order {order} in tier {tier}"),
        (Some(order), _) => format!("order {order}"),
        (None, Some(tier)) => format!("tier {tier}"),
        (None, None) => String::new(),
    };
    if ordered_actions {
        findings.push(Finding::warning(
            FindingCode::OrderSensitive,
            format!("{what} decides how deny and pass rules interact with other policies"),
        ));
    } else {
        findings.push(Finding::info(
            FindingCode::OrderIgnored,
            format!("{what} dropped; allow rules do not depend on ordering"),
        ));
    }
}

/// Split a rule into one rule per L3 family, in first-seen order.
/// With `dedupe`, repeated peers and ports are dropped as well.
fn split_by_family(rule: &TrafficRule, dedupe: bool) -> Vec<TrafficRule> {
    let ports = if dedupe {
        dedup(&rule.ports)
    } else {
        rule.ports.clone()
    };
    let peers = if dedupe {
        dedup(&rule.peers)
    } else {
        rule.peers.clone()
    };

    let mut groups: Vec<(PeerKind, Vec<Peer>)> = Vec::new();
    for peer in peers {
        match groups.iter_mut().find(|(kind, _)| *kind == peer.kind()) {
            Some((_, group)) => group.push(peer),
            None => groups.push((peer.kind(), vec![peer])),
        }
    }
    if groups.is_empty() {
        return vec![TrafficRule {
            action: rule.action,
            peers: Vec::new(),
            ports,
            l7: rule.l7.clone(),
        }];
    }
    groups
        .into_iter()
        .map(|(_, peers)| TrafficRule {
            action: rule.action,
            peers,
            ports: ports.clone(),
            l7: rule.l7.clone(),
        })
        .collect()
}

fn dedup<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn direction_list(doc: &PolicyDocument) -> String {
    let names: Vec<&str> = doc.policy_types.iter().map(|d| d.as_str()).collect();
    names.join(" and ")
}

fn selects_all_host_endpoints(source: &PolicyDocument) -> bool {
    source.source_dialect == Dialect::Calico
        && source.kind == "GlobalNetworkPolicy"
        && source.pod_selector.is_empty()
}

fn output_labels(
    source: &PolicyDocument,
    options: &TranslateOptions,
    named_ports: &BTreeSet<String>,
) -> BTreeMap<String, String> {
    let mut labels = source.labels.clone();
    labels.extend(options.output_labels.clone());
    for name in named_ports {
        labels.insert(
            format!("{NAMED_PORT_LABEL_PREFIX}{name}"),
            "unresolved".to_string(),
        );
    }
    labels
}

fn output_annotations(source: &PolicyDocument, options: &TranslateOptions) -> BTreeMap<String, String> {
    let mut annotations = source.annotations.clone();
    annotations.remove(LAST_APPLIED_ANNOTATION);
    if options.annotate_source {
        annotations.insert(
            SOURCE_ANNOTATION.to_string(),
            format!(
                "{}/{}/{}",
                source.source_dialect,
                source.kind,
                source.qualified_name()
            ),
        );
    }
    annotations
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{translate, translate_with_options, TargetKind, TranslateOptions};
    use crate::cidr::Cidr;
    use crate::finding::{FindingCode, Severity};
    use crate::model::{
        CidrBlock, Dialect, Direction, Entity, LabelMatch, Peer, PolicyDocument, PolicySelector,
        PortRule, PortSpec, Protocol, RuleAction, TrafficRule, WorkloadKind,
    };

    fn doc(dialect: Dialect, ingress: Vec<TrafficRule>) -> PolicyDocument {
        PolicyDocument {
            name: "p".to_string(),
            namespace: Some("shop".to_string()),
            labels: Default::default(),
            annotations: Default::default(),
            workload: WorkloadKind::Pods,
            pod_selector: PolicySelector::pods(LabelMatch::from_labels([("app", "api")])),
            policy_types: BTreeSet::from([Direction::Ingress]),
            ingress,
            egress: Vec::new(),
            source_dialect: dialect,
            kind: "NetworkPolicy".to_string(),
            order: None,
            tier: None,
        }
    }

    fn endpoints(app: &str) -> Peer {
        Peer::Endpoints(PolicySelector::pods(LabelMatch::from_labels([("app", app)])))
    }

    fn cidr(raw: &str) -> Peer {
        Peer::Cidr(CidrBlock::new(raw.parse::<Cidr>().expect("cidr")))
    }

    #[test]
    fn mixed_rules_split_into_contiguous_parts() {
        let source = doc(
            Dialect::Kubernetes,
            vec![
                TrafficRule::allow(
                    vec![endpoints("a"), cidr("10.0.0.0/8"), endpoints("b")],
                    vec![PortRule::new(Protocol::Tcp, PortSpec::Number(80))],
                ),
                TrafficRule::allow(vec![endpoints("c")], Vec::new()),
            ],
        );
        let result = translate(&source);
        let target = &result.outputs[0];
        assert_eq!(target.kind, TargetKind::CiliumNetworkPolicy);
        assert_eq!(target.document.ingress.len(), 3);
        assert_eq!(target.document.ingress[0].peers.len(), 2);
        let origins: Vec<_> = target
            .origins
            .iter()
            .map(|o| (o.target_index, o.source_index, o.part))
            .collect();
        assert_eq!(origins, vec![(0, 0, 0), (1, 0, 1), (2, 1, 0)]);
        assert!(result
            .findings
            .iter()
            .any(|f| f.code == FindingCode::RuleSplit && f.severity == Severity::Info));
    }

    #[test]
    fn calico_deny_pass_and_log_are_omitted() {
        let mut source = doc(Dialect::Calico, Vec::new());
        source.order = Some(10.0);
        for action in [RuleAction::Deny, RuleAction::Pass, RuleAction::Log] {
            source.ingress.push(TrafficRule {
                action,
                peers: Vec::new(),
                ports: Vec::new(),
                l7: None,
            });
        }
        let result = translate(&source);
        assert!(result.outputs[0].document.ingress.is_empty());
        let codes: Vec<_> = result.findings.iter().map(|f| (f.code, f.severity)).collect();
        assert!(codes.contains(&(FindingCode::OrderSensitive, Severity::Warning)));
        assert_eq!(
            codes
                .iter()
                .filter(|c| **c == (FindingCode::ActionNotRepresentable, Severity::Warning))
                .count(),
            2
        );
        assert!(codes.contains(&(FindingCode::LogActionIgnored, Severity::Info)));
    }

    #[test]
    fn cilium_deny_rules_are_kept() {
        let source = doc(
            Dialect::Cilium,
            vec![TrafficRule {
                action: RuleAction::Deny,
                peers: vec![Peer::Entity {
                    entity: Entity::World,
                }],
                ports: Vec::new(),
                l7: None,
            }],
        );
        let result = translate(&source);
        assert_eq!(result.outputs[0].document.ingress.len(), 1);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn named_ports_are_labelled() {
        let source = doc(
            Dialect::Kubernetes,
            vec![TrafficRule::allow(
                Vec::new(),
                vec![PortRule::new(Protocol::Tcp, PortSpec::Named("http".to_string()))],
            )],
        );
        let result = translate(&source);
        let labels = &result.outputs[0].document.labels;
        assert_eq!(
            labels.get("named-port.cni-migrate.io/http").map(String::as_str),
            Some("unresolved")
        );
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn host_policy_is_opt_in_and_warns() {
        let mut source = doc(Dialect::Calico, vec![TrafficRule::allow(Vec::new(), Vec::new())]);
        source.namespace = None;
        source.kind = "GlobalNetworkPolicy".to_string();
        source.pod_selector = PolicySelector::default();

        assert_eq!(translate(&source).outputs.len(), 1);

        let options = TranslateOptions {
            host_policies: true,
            ..TranslateOptions::default()
        };
        let result = translate_with_options(&source, &options);
        assert_eq!(result.outputs.len(), 2);
        assert_eq!(result.outputs[1].document.workload, WorkloadKind::Nodes);
        assert_eq!(result.outputs[1].document.name, "p-host");
        let host = result
            .findings
            .iter()
            .find(|f| f.code == FindingCode::HostPolicyEmitted)
            .expect("host policy finding");
        assert_eq!(host.severity, Severity::Warning);
        assert!(host.message.contains("every node"), "{}", host.message);
    }
}
