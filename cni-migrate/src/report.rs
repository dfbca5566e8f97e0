use colored::Colorize;
use netpol_core::{format_text, BatchOutcome, Report};

use crate::lint::{render_lint_text, LintReport};

/// Render a conversion report for the terminal.
pub fn render_report(report: &Report) -> String {
    let mut out: Vec<String> = format_text(report).lines().map(colorize_line).collect();
    out.push(render_outcome(report.outcome()));
    out.join("\n")
}

/// Render a lint report for the terminal.
pub fn render_lint(report: &LintReport) -> String {
    render_lint_text(report)
        .lines()
        .map(colorize_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_outcome(outcome: BatchOutcome) -> String {
    let line = match outcome {
        BatchOutcome::Clean => "outcome=clean".green(),
        BatchOutcome::Warnings => "outcome=warnings".yellow(),
        BatchOutcome::Failed => "outcome=failed".red(),
    };
    line.bold().to_string()
}

fn colorize_line(line: &str) -> String {
    if line.starts_with("- error") {
        line.red().to_string()
    } else if line.starts_with("- warning") {
        line.yellow().to_string()
    } else if line.starts_with("- info") {
        line.dimmed().to_string()
    } else if line.starts_with("conversion_summary") || line.starts_with("verify ") {
        line.cyan().to_string()
    } else {
        line.to_string()
    }
}
