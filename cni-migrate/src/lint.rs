//! Structural checks on Cilium policy manifests.
//!
//! These run on hand-written or converted manifests before they reach a
//! cluster. Each document is checked for the mistakes Cilium either rejects
//! or silently misreads, then parsed with the Cilium reader of the core.

use netpol_core::cidr::Cidr;
use netpol_core::manifest::cilium::{
    CiliumRuleView, API_VERSION, KIND_CLUSTERWIDE, KIND_NAMESPACED,
};
use netpol_core::manifest::{CiliumEgressRule, CiliumIngressRule, CiliumPolicy};
use netpol_core::parser::{parse_value, split_documents};
use netpol_core::{Dialect, ParseErrorReason};
use serde::Serialize;
use serde_yaml::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LintSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
    pub severity: LintSeverity,
    /// `<file>#<document>`.
    pub origin: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub files: usize,
    pub documents: usize,
    pub errors: usize,
    pub warnings: usize,
    pub issues: Vec<LintIssue>,
}

impl LintReport {
    /// Lint every document of one loaded file.
    pub fn add_file(&mut self, origin: &str, raw: &str) {
        self.files += 1;
        for (index, value) in split_documents(raw).into_iter().enumerate() {
            self.documents += 1;
            let checks = match value {
                Ok(value) => lint_document(&value),
                Err(err) => vec![Check::error("yaml_syntax", err.detail)],
            };
            for check in checks {
                match check.severity {
                    LintSeverity::Error => self.errors += 1,
                    LintSeverity::Warning => self.warnings += 1,
                }
                self.issues.push(LintIssue {
                    severity: check.severity,
                    origin: format!("{origin}#{}", index + 1),
                    code: check.code.to_string(),
                    message: check.message,
                });
            }
        }
    }
}

/// Plain-text rendering in the same `key=value` layout as the conversion
/// report.
pub fn render_lint_text(report: &LintReport) -> String {
    let mut out = Vec::new();
    out.push(format!(
        "verify files={} documents={}",
        report.files, report.documents
    ));
    out.push(format!(
        "result errors={} warnings={}",
        report.errors, report.warnings
    ));
    out.push("issues".to_string());
    if report.issues.is_empty() {
        out.push("- none".to_string());
    }
    for issue in &report.issues {
        let sev = match issue.severity {
            LintSeverity::Error => "error",
            LintSeverity::Warning => "warning",
        };
        out.push(format!(
            "- {sev} {} {}: {}",
            issue.origin, issue.code, issue.message
        ));
    }
    out.join("\n")
}

struct Check {
    severity: LintSeverity,
    code: &'static str,
    message: String,
}

impl Check {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: LintSeverity::Error,
            code,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: LintSeverity::Warning,
            code,
            message: message.into(),
        }
    }
}

fn lint_document(value: &Value) -> Vec<Check> {
    let mut out = Vec::new();
    if !value.is_mapping() {
        out.push(Check::error("not_a_mapping", "document is not a mapping"));
        return out;
    }

    match value.get("apiVersion").and_then(Value::as_str) {
        None => out.push(Check::error("missing_api_version", "apiVersion is required")),
        Some(api) if api != API_VERSION => out.push(Check::error(
            "unexpected_api_version",
            format!("apiVersion {api} is not {API_VERSION}"),
        )),
        Some(_) => {}
    }
    let kind = value.get("kind").and_then(Value::as_str);
    let namespaced = match kind {
        None => {
            out.push(Check::error("missing_kind", "kind is required"));
            return out;
        }
        Some(KIND_NAMESPACED) => true,
        Some(KIND_CLUSTERWIDE) => false,
        Some(other) => {
            out.push(Check::error(
                "unexpected_kind",
                format!("kind {other} is not a Cilium network policy"),
            ));
            return out;
        }
    };

    let metadata = value.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if name.is_empty() {
        out.push(Check::error("missing_name", "metadata.name is required"));
    }
    if namespaced && metadata.and_then(|m| m.get("namespace")).is_none() {
        out.push(Check::warning(
            "missing_namespace",
            "metadata.namespace is unset; the policy lands in whatever namespace it is applied to",
        ));
    }
    if value.get("spec").is_none() {
        out.push(Check::error("missing_spec", "spec is required"));
        return out;
    }

    let policy: CiliumPolicy = match serde_yaml::from_value(value.clone()) {
        Ok(policy) => policy,
        Err(err) => {
            out.push(Check::error("invalid_shape", err.to_string()));
            return out;
        }
    };
    lint_spec(&policy, namespaced, &mut out);

    if out.iter().all(|c| c.severity != LintSeverity::Error) {
        if let Err(err) = parse_value(value.clone(), Some(Dialect::Cilium)) {
            out.push(match err.reason {
                ParseErrorReason::UnsupportedField => {
                    Check::warning("not_convertible", err.to_string())
                }
                _ => Check::error("parse_rejected", err.to_string()),
            });
        }
    }
    out
}

fn lint_spec(policy: &CiliumPolicy, namespaced: bool, out: &mut Vec<Check>) {
    let spec = &policy.spec;
    if spec.endpoint_selector.is_some() == spec.node_selector.is_some() {
        out.push(Check::error(
            "selector_count",
            "exactly one of spec.endpointSelector or spec.nodeSelector is required",
        ));
    }
    if namespaced && spec.node_selector.is_some() {
        out.push(Check::error(
            "node_selector_namespaced",
            "spec.nodeSelector is only valid on a CiliumClusterwideNetworkPolicy",
        ));
    }
    if spec.ingress.is_none()
        && spec.egress.is_none()
        && spec.ingress_deny.is_none()
        && spec.egress_deny.is_none()
    {
        out.push(Check::warning(
            "no_rules",
            "spec has no ingress or egress section and enforces nothing",
        ));
    }

    let sections = [
        ("ingress", "from", ingress(&spec.ingress)),
        ("ingressDeny", "from", ingress(&spec.ingress_deny)),
        ("egress", "to", egress(&spec.egress)),
        ("egressDeny", "to", egress(&spec.egress_deny)),
    ];
    for (section, prefix, rules) in &sections {
        for (index, rule) in rules.iter().enumerate() {
            lint_rule(&format!("spec.{section}[{index}]"), prefix, rule, out);
        }
    }
}

fn ingress(rules: &Option<Vec<CiliumIngressRule>>) -> Vec<CiliumRuleView<'_>> {
    rules.iter().flatten().map(CiliumIngressRule::view).collect()
}

fn egress(rules: &Option<Vec<CiliumEgressRule>>) -> Vec<CiliumRuleView<'_>> {
    rules.iter().flatten().map(CiliumEgressRule::view).collect()
}

fn lint_rule(path: &str, prefix: &str, rule: &CiliumRuleView<'_>, out: &mut Vec<Check>) {
    if rule.endpoints.is_some_and(|e| e.is_empty()) {
        out.push(Check::error(
            "empty_endpoints",
            format!("{path}.{prefix}Endpoints is an empty list and selects nothing"),
        ));
    }
    if rule.l3_kinds() > 1 {
        out.push(Check::error(
            "combined_l3_selectors",
            format!("{path} combines endpoint, CIDR and entity selectors in one rule"),
        ));
    }
    for raw in rule.cidr.into_iter().flatten() {
        if raw.parse::<Cidr>().is_err() {
            out.push(Check::error(
                "invalid_cidr",
                format!("{path}.{prefix}CIDR has invalid CIDR {raw}"),
            ));
        }
    }
    for set in rule.cidr_set.into_iter().flatten() {
        let Ok(cidr) = set.cidr.parse::<Cidr>() else {
            out.push(Check::error(
                "invalid_cidr",
                format!("{path}.{prefix}CIDRSet has invalid CIDR {}", set.cidr),
            ));
            continue;
        };
        for except in &set.except {
            match except.parse::<Cidr>() {
                Ok(inner) if inner.is_proper_subnet_of(&cidr) => {}
                Ok(_) => out.push(Check::error(
                    "except_outside_cidr",
                    format!("{path}: except {except} is not inside {cidr}"),
                )),
                Err(_) => out.push(Check::error(
                    "invalid_cidr",
                    format!("{path}: except has invalid CIDR {except}"),
                )),
            }
        }
    }
    for (index, entry) in rule.to_ports.into_iter().flatten().enumerate() {
        if entry.ports.as_ref().map_or(true, Vec::is_empty) {
            out.push(Check::error(
                "to_ports_without_ports",
                format!("{path}.toPorts[{index}] has no ports"),
            ));
        }
    }
    if !rule.extra.is_empty() {
        let keys: Vec<&str> = rule.extra.keys().map(String::as_str).collect();
        out.push(Check::warning(
            "unchecked_field",
            format!("{path} has fields this tool does not check: {}", keys.join(", ")),
        ));
    }
}
