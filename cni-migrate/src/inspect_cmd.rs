use std::fs;

use anyhow::{Context, Result};
use cni_migrate::inspect::{render_documents, InspectEntry};
use netpol_core::parse_stream;

use crate::cli::{InspectArgs, OutputFormat};

pub fn run_inspect(args: InspectArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let documents = parse_stream(&raw, args.from.dialect());

    match args.format {
        OutputFormat::Text => println!("{}", render_documents(&documents)),
        OutputFormat::Json => {
            let entries: Vec<InspectEntry> = documents.into_iter().map(InspectEntry::from).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
