//! Network policy conversion engine.
//!
//! Parses Kubernetes, Calico and Cilium network policies into one model,
//! translates them into Cilium policies, renders those as manifests and
//! checks statically that the conversion neither narrows nor widens access.

pub mod cidr;
pub mod equivalence;
pub mod finding;
pub mod manifest;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod translate;
pub mod writer;

pub use cidr::{Cidr, CidrError};
pub use equivalence::validate;
pub use finding::{Finding, FindingCode, RuleRef, Severity};
pub use model::{Dialect, Direction, PolicyDocument};
pub use parser::{parse, parse_stream, parser_for, ParseError, ParseErrorReason, Parser};
pub use pipeline::{convert_document, convert_text, DocumentOutcome};
pub use report::{format_json, format_text, summarize, BatchOutcome, Report};
pub use translate::{
    translate, translate_with_options, ConversionResult, TargetKind, TargetPolicy,
    TranslateOptions,
};
pub use writer::{render, to_yaml};
