//! Parse, translate and validate every document in a loaded text.

use serde::Serialize;
use tracing::{info, warn};

use crate::equivalence::validate;
use crate::manifest::CiliumPolicy;
use crate::model::{Dialect, PolicyDocument};
use crate::parser::{parse_stream, ParseError};
use crate::translate::{translate_with_options, ConversionResult, TranslateOptions};
use crate::writer::render;

/// What happened to one input document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Converted {
        origin: String,
        result: ConversionResult,
    },
    Rejected {
        origin: String,
        dialect: Option<Dialect>,
        name: Option<String>,
        namespace: Option<String>,
        error: ParseError,
    },
}

impl DocumentOutcome {
    pub fn origin(&self) -> &str {
        match self {
            DocumentOutcome::Converted { origin, .. } | DocumentOutcome::Rejected { origin, .. } => {
                origin
            }
        }
    }

    pub fn result(&self) -> Option<&ConversionResult> {
        match self {
            DocumentOutcome::Converted { result, .. } => Some(result),
            DocumentOutcome::Rejected { .. } => None,
        }
    }

    /// Rendered manifests of every produced policy; empty when rejected.
    pub fn manifests(&self) -> Vec<CiliumPolicy> {
        self.result()
            .map(|r| r.outputs.iter().map(render).collect())
            .unwrap_or_default()
    }
}

/// Translate one parsed document and attach the validator's findings.
pub fn convert_document(doc: &PolicyDocument, options: &TranslateOptions) -> ConversionResult {
    let mut result = translate_with_options(doc, options);
    let gaps = validate(doc, &result);
    result.findings.extend(gaps);
    result
}

/// Run the whole pipeline over `text`, which may hold several YAML
/// documents. `origin` names the input in the outcomes, suffixed with the
/// 1-based document position.
pub fn convert_text(
    origin: &str,
    text: &str,
    dialect: Option<Dialect>,
    options: &TranslateOptions,
) -> Vec<DocumentOutcome> {
    parse_stream(text, dialect)
        .into_iter()
        .map(|entry| {
            let origin = format!("{origin}#{}", entry.index + 1);
            match entry.result {
                Ok(doc) => {
                    let result = convert_document(&doc, options);
                    info!(
                        origin = %origin,
                        policy = %doc.qualified_name(),
                        outputs = result.outputs.len(),
                        "converted document"
                    );
                    DocumentOutcome::Converted { origin, result }
                }
                Err(error) => {
                    warn!(origin = %origin, error = %error, "rejected document");
                    DocumentOutcome::Rejected {
                        origin,
                        dialect: entry.dialect,
                        name: entry.name,
                        namespace: entry.namespace,
                        error,
                    }
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{convert_text, DocumentOutcome};
    use crate::translate::TranslateOptions;

    #[test]
    fn one_bad_document_does_not_stop_the_rest() {
        let raw = r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: ok, namespace: shop}
spec: {podSelector: {}}
---
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: broken, namespace: shop}
spec: {}
"#;
        let outcomes = convert_text("in.yaml", raw, None, &TranslateOptions::default());
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], DocumentOutcome::Converted { .. }));
        assert_eq!(outcomes[0].manifests().len(), 1);
        match &outcomes[1] {
            DocumentOutcome::Rejected { origin, name, .. } => {
                assert_eq!(origin, "in.yaml#2");
                assert_eq!(name.as_deref(), Some("broken"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
