//! Aggregate conversion outcomes into a report.

use serde::Serialize;

use crate::finding::Severity;
use crate::model::Direction;
use crate::pipeline::DocumentOutcome;

pub mod json;
pub mod text;

pub use json::format_json;
pub use text::format_text;

/// Overall verdict of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Clean,
    Warnings,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub documents: usize,
    pub converted_clean: usize,
    pub converted_with_warnings: usize,
    pub converted_with_errors: usize,
    pub failed_to_parse: usize,
    pub output_policies: usize,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

/// One finding or parse failure, located in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub severity: Severity,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<usize>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub totals: Totals,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn outcome(&self) -> BatchOutcome {
        if self.totals.errors > 0 || self.totals.failed_to_parse > 0 {
            BatchOutcome::Failed
        } else if self.totals.warnings > 0 {
            BatchOutcome::Warnings
        } else {
            BatchOutcome::Clean
        }
    }
}

/// Build the report for a batch, keeping input order.
pub fn summarize(outcomes: &[DocumentOutcome]) -> Report {
    let mut report = Report::default();
    for outcome in outcomes {
        report.totals.documents += 1;
        match outcome {
            DocumentOutcome::Rejected {
                origin,
                name,
                namespace,
                error,
                ..
            } => {
                report.totals.failed_to_parse += 1;
                report.totals.errors += 1;
                report.entries.push(ReportEntry {
                    severity: Severity::Error,
                    origin: origin.clone(),
                    document: name.clone(),
                    namespace: namespace.clone(),
                    direction: None,
                    rule_index: None,
                    code: reason_code(error),
                    message: format!("{}: {}", error.path, error.detail),
                });
            }
            DocumentOutcome::Converted { origin, result } => {
                report.totals.output_policies += result.outputs.len();
                match result.highest_severity() {
                    Some(Severity::Error) => report.totals.converted_with_errors += 1,
                    Some(Severity::Warning) => report.totals.converted_with_warnings += 1,
                    _ => report.totals.converted_clean += 1,
                }
                for finding in &result.findings {
                    match finding.severity {
                        Severity::Error => report.totals.errors += 1,
                        Severity::Warning => report.totals.warnings += 1,
                        Severity::Info => report.totals.infos += 1,
                    }
                    report.entries.push(ReportEntry {
                        severity: finding.severity,
                        origin: origin.clone(),
                        document: Some(result.source.name.clone()),
                        namespace: result.source.namespace.clone(),
                        direction: finding.rule.map(|r| r.direction),
                        rule_index: finding.rule.map(|r| r.index),
                        code: finding.code.as_str().to_string(),
                        message: finding.message.clone(),
                    });
                }
            }
        }
    }
    report
}

fn reason_code(error: &crate::parser::ParseError) -> String {
    use crate::parser::ParseErrorReason;
    match error.reason {
        ParseErrorReason::UnsupportedField => "unsupported_field",
        ParseErrorReason::MalformedSelector => "malformed_selector",
        ParseErrorReason::SchemaViolation => "schema_violation",
    }
    .to_string()
}
