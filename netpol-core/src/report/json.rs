use super::Report;

/// Format a report as pretty-printed JSON.
pub fn format_json(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
