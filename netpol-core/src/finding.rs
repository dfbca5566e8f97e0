use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::model::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a [`Finding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    /// Deny/Pass rule omitted; Cilium allow-lists cannot express it.
    ActionNotRepresentable,
    /// Calico Log rule omitted; it never changes the verdict.
    LogActionIgnored,
    /// Port given by name; resolvable only against running pods.
    UnresolvedNamedPort,
    /// Calico order/tier affects the verdict of non-allow rules.
    OrderSensitive,
    /// Calico order/tier present but only allow rules follow it.
    OrderIgnored,
    /// Rule recognised as cluster DNS access and carried verbatim.
    WellKnownDnsPeer,
    /// Rule mixed selector kinds and was split into several Cilium rules.
    RuleSplit,
    /// Global policy duplicated as a node (host firewall) policy.
    HostPolicyEmitted,
    /// A source grant is missing from the converted policies.
    CoverageGap,
    /// The converted policies grant something the source does not.
    OverPermission,
    /// Converted policy selects a different workload than the source.
    ScopeMismatch,
    /// Declared directions differ between source and converted policy.
    DirectionMismatch,
    /// A converted policy did not parse back as Cilium.
    RenderRejected,
}

impl FindingCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCode::ActionNotRepresentable => "action_not_representable",
            FindingCode::LogActionIgnored => "log_action_ignored",
            FindingCode::UnresolvedNamedPort => "unresolved_named_port",
            FindingCode::OrderSensitive => "order_sensitive",
            FindingCode::OrderIgnored => "order_ignored",
            FindingCode::WellKnownDnsPeer => "well_known_dns_peer",
            FindingCode::RuleSplit => "rule_split",
            FindingCode::HostPolicyEmitted => "host_policy_emitted",
            FindingCode::CoverageGap => "coverage_gap",
            FindingCode::OverPermission => "over_permission",
            FindingCode::ScopeMismatch => "scope_mismatch",
            FindingCode::DirectionMismatch => "direction_mismatch",
            FindingCode::RenderRejected => "render_rejected",
        }
    }
}

impl Display for FindingCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a rule inside the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RuleRef {
    pub direction: Direction,
    pub index: usize,
}

/// A semantic concern raised while translating or validating a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: FindingCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleRef>,
}

impl Finding {
    pub fn new(severity: Severity, code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            rule: None,
        }
    }

    pub fn info(code: FindingCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    pub fn warning(code: FindingCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn error(code: FindingCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn at(mut self, direction: Direction, index: usize) -> Self {
        self.rule = Some(RuleRef { direction, index });
        self
    }
}
