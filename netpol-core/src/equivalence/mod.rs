//! Static equivalence check between a source policy and its conversion.
//!
//! Each target is rendered, parsed back as Cilium and flattened into
//! grants: one `(direction, peer, port, l7)` tuple per peer and port of a
//! rule. Source and target grant sets must cover each other.

use std::fmt::{self, Display, Formatter};

use tracing::debug;

use crate::finding::{Finding, FindingCode};
use crate::model::{
    Dialect, Direction, L7Rules, LabelMatch, Peer, PolicyDocument, PortRule, PortSpec, Protocol,
    RuleAction, TrafficRule,
};
use crate::parser::cilium::NAMESPACE_NAME_LABEL;
use crate::parser::{CiliumParser, Parser};
use crate::translate::{ConversionResult, TargetPolicy};
use crate::writer;

mod coverage;

use coverage::{l7_covers, match_covers, peer_covers, port_covers, ScopedPeer};

#[derive(Debug, Clone)]
struct Grant {
    direction: Direction,
    action: RuleAction,
    rule_index: usize,
    peer: ScopedPeer,
    port: PortRule,
    l7: Option<L7Rules>,
}

impl Grant {
    fn covers(&self, other: &Grant) -> bool {
        self.direction == other.direction
            && self.action == other.action
            && peer_covers(&self.peer, &other.peer)
            && port_covers(&self.port, &other.port)
            && l7_covers(self.l7.as_ref(), other.l7.as_ref())
    }
}

impl Display for Grant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let peer = match &self.peer {
            ScopedPeer::Any => "any peer".to_string(),
            ScopedPeer::Endpoints { pods, namespaces } => {
                format!("pods {} in namespaces {}", describe(pods), describe(namespaces))
            }
            ScopedPeer::Cidr(block) if block.except.is_empty() => block.cidr.to_string(),
            ScopedPeer::Cidr(block) => {
                let except: Vec<String> = block.except.iter().map(ToString::to_string).collect();
                format!("{} except {}", block.cidr, except.join(","))
            }
            ScopedPeer::Entity(entity) => format!("entity {}", entity.as_str()),
        };
        let port = match &self.port.port {
            PortSpec::Any => "any".to_string(),
            PortSpec::Number(n) => n.to_string(),
            PortSpec::Range(s, e) => format!("{s}-{e}"),
            PortSpec::Named(name) => name.clone(),
        };
        write!(
            f,
            "{} {} {}/{}",
            self.direction,
            peer,
            self.port.protocol.as_str(),
            port
        )?;
        if self.l7.is_some() {
            f.write_str(" with L7 rules")?;
        }
        Ok(())
    }
}

fn describe(m: &LabelMatch) -> String {
    if m.is_empty() {
        return "{*}".to_string();
    }
    let mut parts: Vec<String> = m.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.extend(m.expressions.iter().map(|req| {
        let values: Vec<&str> = req.values.iter().map(String::as_str).collect();
        if values.is_empty() {
            format!("{} {}", req.key, req.operator.as_str())
        } else {
            format!("{} {} ({})", req.key, req.operator.as_str(), values.join(","))
        }
    }));
    format!("{{{}}}", parts.join(", "))
}

/// Compare `source` against every target in `result`.
pub fn validate(source: &PolicyDocument, result: &ConversionResult) -> Vec<Finding> {
    let mut findings = Vec::new();
    let source_grants = grants(source, |rule| carried(source, rule));

    for target in &result.outputs {
        let value = match writer::render_value(target) {
            Ok(value) => value,
            Err(err) => {
                findings.push(Finding::error(
                    FindingCode::RenderRejected,
                    format!("{} could not be rendered: {err}", target.document.name),
                ));
                continue;
            }
        };
        let reparsed = match CiliumParser.parse_value(value) {
            Ok(doc) => doc,
            Err(err) => {
                findings.push(Finding::error(
                    FindingCode::RenderRejected,
                    format!("{} does not parse as Cilium: {err}", target.document.name),
                ));
                continue;
            }
        };
        check_target(source, &source_grants, target, &reparsed, &mut findings);
    }

    debug!(
        policy = %source.qualified_name(),
        findings = findings.len(),
        "validated conversion"
    );
    findings
}

fn check_target(
    source: &PolicyDocument,
    source_grants: &[Grant],
    target: &TargetPolicy,
    reparsed: &PolicyDocument,
    findings: &mut Vec<Finding>,
) {
    let name = &target.document.name;

    if reparsed.namespace != source.namespace {
        findings.push(Finding::error(
            FindingCode::ScopeMismatch,
            format!(
                "{name} is in namespace {} but the source is in {}",
                reparsed.namespace.as_deref().unwrap_or("<cluster>"),
                source.namespace.as_deref().unwrap_or("<cluster>")
            ),
        ));
    }
    if reparsed.workload == source.workload {
        let same = match_covers(&reparsed.pod_selector.pods, &source.pod_selector.pods)
            && match_covers(&source.pod_selector.pods, &reparsed.pod_selector.pods)
            && reparsed.pod_selector.namespaces == source.pod_selector.namespaces;
        if !same {
            findings.push(Finding::error(
                FindingCode::ScopeMismatch,
                format!("{name} selects different workloads than the source"),
            ));
        }
    }

    for direction in [Direction::Ingress, Direction::Egress] {
        let declared_source = source.declares(direction);
        let declared_target = reparsed.declares(direction);
        if declared_source != declared_target {
            findings.push(Finding::error(
                FindingCode::DirectionMismatch,
                format!(
                    "{name} {} {direction} but the source {}",
                    if declared_target { "declares" } else { "does not declare" },
                    if declared_source { "does" } else { "does not" }
                ),
            ));
            continue;
        }
        let representable = source
            .rules(direction)
            .iter()
            .any(|rule| carried(source, rule));
        if declared_source && representable && reparsed.rules(direction).is_empty() {
            findings.push(Finding::error(
                FindingCode::DirectionMismatch,
                format!("{name} has no {direction} rules but the source allows {direction} traffic"),
            ));
        }
    }

    let target_grants = grants(reparsed, |_| true);
    for grant in source_grants {
        let covered = target_grants.iter().any(|t| t.covers(grant));
        if covered {
            continue;
        }
        // A missing deny leaves traffic open.
        let code = match grant.action {
            RuleAction::Deny => FindingCode::OverPermission,
            _ => FindingCode::CoverageGap,
        };
        findings.push(
            Finding::error(code, format!("{grant} is missing from {name}"))
                .at(grant.direction, grant.rule_index),
        );
    }
    for grant in &target_grants {
        if source_grants.iter().any(|s| s.covers(grant)) {
            continue;
        }
        let code = match grant.action {
            RuleAction::Deny => FindingCode::CoverageGap,
            _ => FindingCode::OverPermission,
        };
        let finding = Finding::error(code, format!("{name} grants {grant} beyond the source"));
        let origin = target
            .origins
            .iter()
            .find(|o| o.direction == grant.direction && o.target_index == grant.rule_index);
        findings.push(match origin {
            Some(origin) => finding.at(origin.direction, origin.source_index),
            None => finding,
        });
    }
}

/// Rules the translator is expected to carry over.
fn carried(source: &PolicyDocument, rule: &TrafficRule) -> bool {
    match rule.action {
        RuleAction::Allow => true,
        RuleAction::Deny => source.source_dialect == Dialect::Cilium,
        RuleAction::Pass | RuleAction::Log => false,
    }
}

fn grants(doc: &PolicyDocument, keep: impl Fn(&TrafficRule) -> bool) -> Vec<Grant> {
    let mut out = Vec::new();
    for direction in [Direction::Ingress, Direction::Egress] {
        for (rule_index, rule) in doc.rules(direction).iter().enumerate() {
            if !keep(rule) {
                continue;
            }
            let peers: Vec<ScopedPeer> = if rule.peers.is_empty() {
                vec![ScopedPeer::Any]
            } else {
                rule.peers.iter().map(|p| scoped(doc, p)).collect()
            };
            let ports = if rule.ports.is_empty() {
                vec![PortRule::new(Protocol::Any, PortSpec::Any)]
            } else {
                rule.ports.clone()
            };
            for peer in &peers {
                for port in &ports {
                    out.push(Grant {
                        direction,
                        action: rule.action,
                        rule_index,
                        peer: peer.clone(),
                        port: port.clone(),
                        l7: rule.l7.clone(),
                    });
                }
            }
        }
    }
    out
}

fn scoped(doc: &PolicyDocument, peer: &Peer) -> ScopedPeer {
    match peer {
        Peer::Endpoints(sel) => {
            let namespaces = match (&sel.namespaces, &doc.namespace) {
                (Some(ns), _) => ns.clone(),
                (None, Some(own)) => LabelMatch::from_labels([(NAMESPACE_NAME_LABEL, own.as_str())]),
                (None, None) => LabelMatch::default(),
            };
            ScopedPeer::Endpoints {
                pods: sel.pods.clone(),
                namespaces,
            }
        }
        Peer::Cidr(block) => ScopedPeer::Cidr(block.clone()),
        Peer::Entity {
            entity: crate::model::Entity::All,
        } => ScopedPeer::Any,
        Peer::Entity { entity } => ScopedPeer::Entity(*entity),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::validate;
    use crate::finding::FindingCode;
    use crate::model::{
        Dialect, Direction, Entity, LabelMatch, Peer, PolicyDocument, PolicySelector, PortRule,
        PortSpec, Protocol, TrafficRule, WorkloadKind,
    };
    use crate::translate::translate;

    fn source(ingress: Vec<TrafficRule>, types: &[Direction]) -> PolicyDocument {
        PolicyDocument {
            name: "web".to_string(),
            namespace: Some("shop".to_string()),
            labels: Default::default(),
            annotations: Default::default(),
            workload: WorkloadKind::Pods,
            pod_selector: PolicySelector::pods(LabelMatch::from_labels([("app", "web")])),
            policy_types: types.iter().copied().collect::<BTreeSet<_>>(),
            ingress,
            egress: Vec::new(),
            source_dialect: Dialect::Kubernetes,
            kind: "NetworkPolicy".to_string(),
            order: None,
            tier: None,
        }
    }

    #[test]
    fn faithful_conversion_has_no_findings() {
        let doc = source(
            vec![
                TrafficRule::allow(
                    vec![Peer::Endpoints(PolicySelector {
                        pods: LabelMatch::from_labels([("app", "api")]),
                        namespaces: Some(LabelMatch::default()),
                    })],
                    vec![PortRule::new(Protocol::Tcp, PortSpec::Number(443))],
                ),
                TrafficRule::allow(Vec::new(), Vec::new()),
            ],
            &[Direction::Ingress, Direction::Egress],
        );
        let result = translate(&doc);
        assert_eq!(validate(&doc, &result), Vec::new());
    }

    #[test]
    fn detects_narrowing_and_widening() {
        let doc = source(
            vec![TrafficRule::allow(
                vec![Peer::Entity {
                    entity: Entity::World,
                }],
                vec![PortRule::new(Protocol::Tcp, PortSpec::Number(80))],
            )],
            &[Direction::Ingress],
        );
        let mut result = translate(&doc);
        let rule = &mut result.outputs[0].document.ingress[0];
        rule.ports = vec![PortRule::new(Protocol::Tcp, PortSpec::Range(80, 81))];
        let codes: Vec<_> = validate(&doc, &result).iter().map(|f| f.code).collect();
        assert_eq!(codes, vec![FindingCode::OverPermission]);

        let mut result = translate(&doc);
        result.outputs[0].document.ingress.clear();
        let codes: Vec<_> = validate(&doc, &result).iter().map(|f| f.code).collect();
        assert_eq!(
            codes,
            vec![FindingCode::DirectionMismatch, FindingCode::CoverageGap]
        );
    }

    #[test]
    fn flags_direction_and_scope_changes() {
        let doc = source(Vec::new(), &[Direction::Ingress, Direction::Egress]);
        let mut result = translate(&doc);
        result.outputs[0].document.policy_types.remove(&Direction::Egress);
        result.outputs[0].document.pod_selector = PolicySelector::default();
        let codes: Vec<_> = validate(&doc, &result).iter().map(|f| f.code).collect();
        assert_eq!(
            codes,
            vec![FindingCode::ScopeMismatch, FindingCode::DirectionMismatch]
        );
    }
}
