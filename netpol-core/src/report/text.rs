use super::{Report, ReportEntry};

/// Format a report as plain text: two summary lines, then one line per
/// entry prefixed with `- <severity>`.
pub fn format_text(report: &Report) -> String {
    let t = &report.totals;
    let mut lines = Vec::with_capacity(report.entries.len() + 3);
    lines.push(format!(
        "conversion_summary documents={} clean={} with_warnings={} with_errors={} failed_to_parse={} output_policies={}",
        t.documents,
        t.converted_clean,
        t.converted_with_warnings,
        t.converted_with_errors,
        t.failed_to_parse,
        t.output_policies
    ));
    lines.push(format!(
        "findings errors={} warnings={} infos={}",
        t.errors, t.warnings, t.infos
    ));
    if report.entries.is_empty() {
        lines.push("- none".to_string());
    }
    for entry in &report.entries {
        lines.push(format_entry(entry));
    }
    lines.join("\n")
}

fn format_entry(entry: &ReportEntry) -> String {
    let document = match (&entry.namespace, &entry.document) {
        (Some(ns), Some(name)) => format!(" {ns}/{name}"),
        (None, Some(name)) => format!(" {name}"),
        _ => String::new(),
    };
    let rule = match (entry.direction, entry.rule_index) {
        (Some(direction), Some(index)) => format!(" {direction}[{index}]"),
        _ => String::new(),
    };
    format!(
        "- {} {}{document}{rule} {}: {}",
        entry.severity, entry.origin, entry.code, entry.message
    )
}

#[cfg(test)]
mod tests {
    use super::format_text;
    use crate::finding::Severity;
    use crate::model::Direction;
    use crate::report::{Report, ReportEntry, Totals};

    #[test]
    fn renders_summary_and_entries() {
        let report = Report {
            totals: Totals {
                documents: 1,
                converted_with_warnings: 1,
                output_policies: 1,
                warnings: 1,
                ..Totals::default()
            },
            entries: vec![ReportEntry {
                severity: Severity::Warning,
                origin: "a.yaml#1".to_string(),
                document: Some("web".to_string()),
                namespace: Some("shop".to_string()),
                direction: Some(Direction::Ingress),
                rule_index: Some(2),
                code: "unresolved_named_port".to_string(),
                message: "named port 'http' must be resolved".to_string(),
            }],
        };
        let text = format_text(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "conversion_summary documents=1 clean=0 with_warnings=1 with_errors=0 failed_to_parse=0 output_policies=1"
        );
        assert_eq!(
            lines[2],
            "- warning a.yaml#1 shop/web ingress[2] unresolved_named_port: named port 'http' must be resolved"
        );
    }

    #[test]
    fn empty_report_says_none() {
        assert!(format_text(&Report::default()).ends_with("- none"));
    }
}
