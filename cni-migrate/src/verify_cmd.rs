use std::fs;

use anyhow::{bail, Context, Result};
use cni_migrate::lint::LintReport;
use cni_migrate::report::render_lint;

use crate::cli::{OutputFormat, VerifyArgs};

pub fn run_verify(args: VerifyArgs) -> Result<()> {
    let mut report = LintReport::default();
    for path in &args.files {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        report.add_file(&path.display().to_string(), &raw);
    }

    match args.format {
        OutputFormat::Text => println!("{}", render_lint(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if report.errors > 0 {
        bail!("verify failed: {} errors", report.errors);
    }
    if args.strict && report.warnings > 0 {
        bail!("verify failed in strict mode: {} warnings", report.warnings);
    }
    Ok(())
}
