//! Batch conversion: discover policy files, run every document through the
//! core pipeline, write one multi-document Cilium file per input file and a
//! JSON summary next to them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cni_migrate::discover::{discover, InputFile};
use cni_migrate::report::render_report;
use cni_migrate::settings::resolve_settings;
use netpol_core::manifest::CiliumPolicy;
use netpol_core::{
    convert_text, format_json, summarize, to_yaml, BatchOutcome, Dialect, DocumentOutcome,
};
use tracing::{debug, info};

use crate::cli::{ConvertArgs, OutputFormat};
use crate::path_guard::{ensure_output_separate, UNKNOWN_GROUP};

const SUMMARY_FILE: &str = "conversion_summary.json";

pub fn run_convert(args: ConvertArgs) -> Result<()> {
    let output = if args.dry_run { None } else { args.output.as_deref() };
    if let Some(output) = output {
        ensure_output_separate(output, &args.input)?;
    }

    let (settings, settings_source) = resolve_settings(args.config.as_deref())?;
    debug!(source = %settings_source, "loaded settings");

    let files = discover(&args.input)
        .with_context(|| format!("failed to read input {}", args.input.display()))?;
    if files.is_empty() {
        bail!("no policy files found under {}", args.input.display());
    }

    let mut converted = Vec::new();
    for file in &files {
        let text = fs::read_to_string(&file.path)
            .with_context(|| format!("failed to read {}", file.path.display()))?;
        let dialect = args.from.dialect().or(file.dialect);
        let origin = file.path.display().to_string();
        converted.push((file, convert_text(&origin, &text, dialect, &settings.translate)));
    }

    let report = summarize(
        &converted
            .iter()
            .flat_map(|(_, outcomes)| outcomes.iter().cloned())
            .collect::<Vec<_>>(),
    );
    let summary_json = format_json(&report).context("failed to serialize conversion summary")?;

    if let Some(output) = output {
        for planned in plan_outputs(output, &converted)? {
            write_planned(&planned)?;
        }
        fs::create_dir_all(output)
            .with_context(|| format!("failed to create {}", output.display()))?;
        let summary_path = output.join(SUMMARY_FILE);
        fs::write(&summary_path, &summary_json)
            .with_context(|| format!("failed to write {}", summary_path.display()))?;
    }

    match args.format {
        OutputFormat::Text => println!("{}", render_report(&report)),
        OutputFormat::Json => println!("{summary_json}"),
    }

    let totals = &report.totals;
    match report.outcome() {
        BatchOutcome::Failed => bail!(
            "conversion failed: {} errors, {} documents failed to parse",
            totals.errors,
            totals.failed_to_parse
        ),
        BatchOutcome::Warnings if args.strict => {
            bail!("conversion failed in strict mode: {} warnings", totals.warnings)
        }
        _ => Ok(()),
    }
}

struct PlannedOutput<'a> {
    source: &'a InputFile,
    target: PathBuf,
    manifests: Vec<CiliumPolicy>,
}

/// Pick `<output>/<group>/<stem>.yaml` for every input file that produced
/// policies. Two inputs mapping to the same target is an error, raised before
/// anything is written.
fn plan_outputs<'a>(
    output: &Path,
    converted: &[(&'a InputFile, Vec<DocumentOutcome>)],
) -> Result<Vec<PlannedOutput<'a>>> {
    let mut planned = Vec::new();
    let mut claimed: BTreeMap<PathBuf, &Path> = BTreeMap::new();
    for (file, outcomes) in converted {
        let manifests: Vec<CiliumPolicy> =
            outcomes.iter().flat_map(DocumentOutcome::manifests).collect();
        if manifests.is_empty() {
            debug!(path = %file.path.display(), "no policies produced");
            continue;
        }

        let group = file
            .dialect
            .or_else(|| detected_dialect(outcomes))
            .map_or(UNKNOWN_GROUP, |d| d.as_str());
        let target = output.join(group).join(format!("{}.yaml", file.stem()));
        if let Some(previous) = claimed.insert(target.clone(), &file.path) {
            bail!(
                "{} and {} would both be written to {}; rename one of them",
                previous.display(),
                file.path.display(),
                target.display()
            );
        }
        planned.push(PlannedOutput {
            source: *file,
            target,
            manifests,
        });
    }
    Ok(planned)
}

fn write_planned(planned: &PlannedOutput<'_>) -> Result<()> {
    if let Some(dir) = planned.target.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let yaml = to_yaml(&planned.manifests).with_context(|| {
        format!(
            "failed to serialize policies for {}",
            planned.source.path.display()
        )
    })?;
    fs::write(&planned.target, yaml)
        .with_context(|| format!("failed to write {}", planned.target.display()))?;
    info!(
        path = %planned.target.display(),
        policies = planned.manifests.len(),
        "wrote converted policies"
    );
    Ok(())
}

fn detected_dialect(outcomes: &[DocumentOutcome]) -> Option<Dialect> {
    outcomes.iter().find_map(|outcome| match outcome {
        DocumentOutcome::Converted { result, .. } => Some(result.source.source_dialect),
        DocumentOutcome::Rejected { dialect, .. } => *dialect,
    })
}
