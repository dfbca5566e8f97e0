use netpol_core::model::{
    L7Rules, LabelMatch, Peer, PolicySelector, PortRule, PortSpec, TrafficRule, WorkloadKind,
};
use netpol_core::parser::StreamDocument;
use netpol_core::{Dialect, Direction, ParseError, PolicyDocument};
use serde::Serialize;

/// JSON view of one parsed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectEntry {
    pub index: usize,
    pub dialect: Option<Dialect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<PolicyDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ParseError>,
}

impl From<StreamDocument> for InspectEntry {
    fn from(entry: StreamDocument) -> Self {
        let (document, error) = match entry.result {
            Ok(doc) => (Some(doc), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            index: entry.index,
            dialect: entry.dialect,
            document,
            error,
        }
    }
}

/// Render parsed documents as indented text, one block per document.
pub fn render_documents(entries: &[StreamDocument]) -> String {
    let mut out = Vec::new();
    for entry in entries {
        let dialect = entry.dialect.map_or("unknown", |d| d.as_str());
        match &entry.result {
            Ok(doc) => render_document(entry.index, dialect, doc, &mut out),
            Err(err) => out.push(format!(
                "document index={} dialect={dialect} rejected: {err}",
                entry.index + 1
            )),
        }
    }
    if out.is_empty() {
        out.push("- none".to_string());
    }
    out.join("\n")
}

fn render_document(index: usize, dialect: &str, doc: &PolicyDocument, out: &mut Vec<String>) {
    out.push(format!(
        "document index={} dialect={dialect} kind={} name={}",
        index + 1,
        doc.kind,
        doc.qualified_name()
    ));
    let workload = match doc.workload {
        WorkloadKind::Pods => "pods",
        WorkloadKind::Nodes => "nodes",
    };
    out.push(format!(
        "  workload={workload} selector={}",
        describe_selector(&doc.pod_selector)
    ));
    let types: Vec<&str> = doc.policy_types.iter().map(Direction::as_str).collect();
    out.push(format!("  policy_types={}", types.join(",")));
    if let Some(order) = doc.order {
        out.push(format!("  order={order}"));
    }
    if let Some(tier) = &doc.tier {
        out.push(format!("  tier={tier}"));
    }
    for direction in [Direction::Ingress, Direction::Egress] {
        if !doc.declares(direction) {
            continue;
        }
        out.push(format!("  {direction}"));
        let rules = doc.rules(direction);
        if rules.is_empty() {
            out.push("  - none (default deny)".to_string());
        }
        for (i, rule) in rules.iter().enumerate() {
            out.push(format!("  - [{i}] {}", describe_rule(rule)));
        }
    }
}

fn describe_rule(rule: &TrafficRule) -> String {
    let peers = if rule.peers.is_empty() {
        "all".to_string()
    } else {
        rule.peers
            .iter()
            .map(describe_peer)
            .collect::<Vec<_>>()
            .join(" ")
    };
    let ports = if rule.ports.is_empty() {
        "all".to_string()
    } else {
        rule.ports
            .iter()
            .map(describe_port)
            .collect::<Vec<_>>()
            .join(",")
    };
    let mut line = format!(
        "{} peers={peers} ports={ports}",
        rule.action.as_str().to_ascii_lowercase()
    );
    if let Some(l7) = &rule.l7 {
        let (kind, count) = match l7 {
            L7Rules::Http(rules) => ("http", rules.len()),
            L7Rules::Kafka(rules) => ("kafka", rules.len()),
            L7Rules::Dns(rules) => ("dns", rules.len()),
        };
        line.push_str(&format!(" l7={kind}({count})"));
    }
    line
}

fn describe_peer(peer: &Peer) -> String {
    match peer {
        Peer::Endpoints(selector) => format!("endpoints({})", describe_selector(selector)),
        Peer::Cidr(block) if block.except.is_empty() => format!("cidr({})", block.cidr),
        Peer::Cidr(block) => {
            let except: Vec<String> = block.except.iter().map(ToString::to_string).collect();
            format!("cidr({} except {})", block.cidr, except.join(","))
        }
        Peer::Entity { entity } => format!("entity({})", entity.as_str()),
    }
}

fn describe_port(port: &PortRule) -> String {
    let spec = match &port.port {
        PortSpec::Any => "any".to_string(),
        PortSpec::Number(n) => n.to_string(),
        PortSpec::Range(start, end) => format!("{start}-{end}"),
        PortSpec::Named(name) => name.clone(),
    };
    format!("{}/{spec}", port.protocol.as_str())
}

fn describe_selector(selector: &PolicySelector) -> String {
    let pods = describe_match(&selector.pods);
    match &selector.namespaces {
        None => pods,
        Some(ns) => format!("{pods} ns:{}", describe_match(ns)),
    }
}

fn describe_match(m: &LabelMatch) -> String {
    if m.is_empty() {
        return "all".to_string();
    }
    let mut parts: Vec<String> = m.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    for req in &m.expressions {
        let values: Vec<&str> = req.values.iter().map(String::as_str).collect();
        parts.push(if values.is_empty() {
            format!("{} {}", req.key, req.operator.as_str())
        } else {
            format!("{} {} ({})", req.key, req.operator.as_str(), values.join(","))
        });
    }
    parts.join(",")
}
