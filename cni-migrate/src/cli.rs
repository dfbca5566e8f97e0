use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use netpol_core::Dialect;

#[derive(Parser, Debug)]
#[command(name = "cni-migrate")]
#[command(about = "Convert Kubernetes and Calico network policies to Cilium policies")]
pub struct Cli {
    /// Raise log verbosity on stderr (-v info, -vv debug). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Convert a policy file or directory into Cilium policies.
    Convert(ConvertArgs),
    /// Lint Cilium policy manifests before applying them.
    Verify(VerifyArgs),
    /// Print the parsed policy model of every document in a file.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// Policy file, or a directory with k8s/, calico/ and cilium/ subdirectories.
    pub input: PathBuf,
    /// Directory that receives converted policies and conversion_summary.json.
    #[arg(long, required_unless_present = "dry_run")]
    pub output: Option<PathBuf>,
    /// Source dialect. `auto` detects it per document.
    #[arg(long, value_enum, default_value_t = SourceDialect::Auto)]
    pub from: SourceDialect,
    /// Settings TOML file. Defaults to the embedded settings.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Treat warnings as failures.
    #[arg(long)]
    pub strict: bool,
    /// Report only; write nothing.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Cilium policy manifests to lint.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Treat warnings as failures.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    pub file: PathBuf,
    #[arg(long, value_enum, default_value_t = SourceDialect::Auto)]
    pub from: SourceDialect,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum SourceDialect {
    Auto,
    Kubernetes,
    Calico,
    Cilium,
}

impl SourceDialect {
    pub fn dialect(self) -> Option<Dialect> {
        match self {
            SourceDialect::Auto => None,
            SourceDialect::Kubernetes => Some(Dialect::Kubernetes),
            SourceDialect::Calico => Some(Dialect::Calico),
            SourceDialect::Cilium => Some(Dialect::Cilium),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
