//! Dialect parsers.
//!
//! Each dialect implements [`Parser`] once; [`parser_for`] picks the
//! implementation from a [`Dialect`]. A document either parses completely
//! or is rejected with a [`ParseError`]: a rule the model cannot hold is
//! never dropped on the way in.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

use crate::cidr::Cidr;
use crate::manifest::{Extra, IntOrString, LabelSelector};
use crate::model::{
    CidrBlock, Dialect, LabelMatch, LabelRequirement, PolicyDocument, SelectorOperator,
};

mod calico;
pub mod calico_selector;
pub mod cilium;
mod kubernetes;

pub use calico::CalicoParser;
pub use cilium::CiliumParser;
pub use kubernetes::KubernetesParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorReason {
    /// The document uses a field the model cannot express.
    UnsupportedField,
    /// A label selector or selector expression is malformed.
    MalformedSelector,
    /// A required field is missing or a value has the wrong shape.
    SchemaViolation,
}

impl Display for ParseErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParseErrorReason::UnsupportedField => "unsupported field",
            ParseErrorReason::MalformedSelector => "malformed selector",
            ParseErrorReason::SchemaViolation => "schema violation",
        })
    }
}

/// Why a document was rejected, and where.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{reason} at {path}: {detail}")]
pub struct ParseError {
    pub reason: ParseErrorReason,
    /// Dotted path into the document, e.g. `spec.ingress[0].from[1]`.
    pub path: String,
    pub detail: String,
}

impl ParseError {
    pub fn new(reason: ParseErrorReason, path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reason,
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn unsupported(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ParseErrorReason::UnsupportedField, path, detail)
    }

    pub fn malformed_selector(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ParseErrorReason::MalformedSelector, path, detail)
    }

    pub fn schema(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ParseErrorReason::SchemaViolation, path, detail)
    }
}

/// Turns one raw document of a dialect into a [`PolicyDocument`].
pub trait Parser {
    /// Parse an already-loaded YAML value whose header matches this dialect.
    fn parse_value(&self, value: Value) -> Result<PolicyDocument, ParseError>;
}

/// Select the parser implementation for `dialect`.
pub fn parser_for(dialect: Dialect) -> &'static dyn Parser {
    match dialect {
        Dialect::Kubernetes => &KubernetesParser,
        Dialect::Calico => &CalicoParser,
        Dialect::Cilium => &CiliumParser,
    }
}

/// Parse a single YAML document written in `dialect`.
pub fn parse(raw: &str, dialect: Dialect) -> Result<PolicyDocument, ParseError> {
    let value: Value =
        serde_yaml::from_str(raw).map_err(|err| ParseError::schema("$", err.to_string()))?;
    parse_value(value, Some(dialect))
}

/// Parse a loaded YAML value, detecting the dialect when `dialect` is `None`.
pub fn parse_value(value: Value, dialect: Option<Dialect>) -> Result<PolicyDocument, ParseError> {
    let detected = resolve_dialect(&value, dialect)?;
    parser_for(detected).parse_value(value)
}

/// One document found in a YAML stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDocument {
    /// Position in the stream after `List` expansion.
    pub index: usize,
    pub dialect: Option<Dialect>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub result: Result<PolicyDocument, ParseError>,
}

/// Split a multi-document YAML stream and parse every policy in it.
///
/// `List` resources (`kind: List`, `NetworkPolicyList`, ...) are expanded
/// into their items. Empty documents are skipped. A YAML syntax error ends
/// the stream with one rejected entry.
pub fn parse_stream(raw: &str, dialect: Option<Dialect>) -> Vec<StreamDocument> {
    let mut out = Vec::new();

    for (index, value) in split_documents(raw).into_iter().enumerate() {
        let entry = match value {
            Ok(value) => {
                let name = metadata_field(&value, "name");
                let namespace = metadata_field(&value, "namespace");
                let detected = resolve_dialect(&value, dialect);
                let result = detected
                    .clone()
                    .and_then(|d| parser_for(d).parse_value(value));
                StreamDocument {
                    index,
                    dialect: detected.ok(),
                    name,
                    namespace,
                    result,
                }
            }
            Err(err) => StreamDocument {
                index,
                dialect,
                name: None,
                namespace: None,
                result: Err(err),
            },
        };
        debug!(
            index = entry.index,
            name = entry.name.as_deref().unwrap_or("<unnamed>"),
            ok = entry.result.is_ok(),
            "parsed stream document"
        );
        out.push(entry);
    }
    out
}

/// Load every document of a YAML stream, expanding `List` resources.
/// Empty documents are skipped; a syntax error ends the stream with one
/// error entry.
pub fn split_documents(raw: &str) -> Vec<Result<Value, ParseError>> {
    let mut values = Vec::new();
    for document in serde_yaml::Deserializer::from_str(raw) {
        match Value::deserialize(document) {
            Ok(Value::Null) => {}
            Ok(value) => expand_list(value, &mut values),
            Err(err) => {
                values.push(Err(ParseError::schema("$", err.to_string())));
                break;
            }
        }
    }
    values
}

fn expand_list(value: Value, out: &mut Vec<Result<Value, ParseError>>) {
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"));
    if !is_list {
        out.push(Ok(value));
        return;
    }
    match value.get("items") {
        Some(Value::Sequence(items)) => out.extend(items.iter().cloned().map(Ok)),
        Some(Value::Null) | None => {}
        Some(_) => out.push(Err(ParseError::schema("items", "list items must be a sequence"))),
    }
}

fn metadata_field(value: &Value, field: &str) -> Option<String> {
    value
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// Work out which dialect a document is written in and check it against the
/// caller's expectation.
pub fn resolve_dialect(value: &Value, expected: Option<Dialect>) -> Result<Dialect, ParseError> {
    if !value.is_mapping() {
        return Err(ParseError::schema("$", "document is not a mapping"));
    }
    let api_version = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::schema("apiVersion", "missing apiVersion"))?;
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::schema("kind", "missing kind"))?;
    let detected = Dialect::detect(api_version, kind).ok_or_else(|| {
        ParseError::unsupported(
            "kind",
            format!("{kind} ({api_version}) is not a supported network policy resource"),
        )
    })?;
    match expected {
        Some(expected) if expected != detected => Err(ParseError::schema(
            "apiVersion",
            format!("document is a {detected} policy but {expected} was requested"),
        )),
        _ => Ok(detected),
    }
}

/// Deserialize `value` into a typed manifest, mapping serde errors.
pub(crate) fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ParseError> {
    serde_yaml::from_value(value).map_err(|err| ParseError::schema("$", err.to_string()))
}

/// Reject the first unrecognised key captured in `extra`.
pub(crate) fn reject_extra(extra: &Extra, path: &str) -> Result<(), ParseError> {
    match extra.keys().next() {
        Some(key) => Err(ParseError::unsupported(
            join(path, key),
            format!("field '{key}' cannot be converted"),
        )),
        None => Ok(()),
    }
}

pub(crate) fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

pub(crate) fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

/// Convert a Kubernetes-shaped label selector.
pub(crate) fn label_match(selector: &LabelSelector, path: &str) -> Result<LabelMatch, ParseError> {
    reject_extra(&selector.extra, path)?;
    let mut expressions = Vec::with_capacity(selector.match_expressions.len());
    for (i, expr) in selector.match_expressions.iter().enumerate() {
        let expr_path = index(&join(path, "matchExpressions"), i);
        let operator = SelectorOperator::parse(&expr.operator).ok_or_else(|| {
            ParseError::malformed_selector(
                &expr_path,
                format!("unknown operator '{}'", expr.operator),
            )
        })?;
        expressions.push(requirement(
            expr.key.clone(),
            operator,
            expr.values.iter().cloned(),
            &expr_path,
        )?);
    }
    Ok(LabelMatch::new(selector.match_labels.clone(), expressions))
}

/// Build a requirement, enforcing the value arity of its operator.
pub(crate) fn requirement(
    key: String,
    operator: SelectorOperator,
    values: impl IntoIterator<Item = String>,
    path: &str,
) -> Result<LabelRequirement, ParseError> {
    let values: std::collections::BTreeSet<String> = values.into_iter().collect();
    if key.is_empty() {
        return Err(ParseError::malformed_selector(path, "empty label key"));
    }
    match operator {
        SelectorOperator::In | SelectorOperator::NotIn if values.is_empty() => {
            Err(ParseError::malformed_selector(
                path,
                format!("operator {} requires values", operator.as_str()),
            ))
        }
        SelectorOperator::Exists | SelectorOperator::DoesNotExist if !values.is_empty() => {
            Err(ParseError::malformed_selector(
                path,
                format!("operator {} takes no values", operator.as_str()),
            ))
        }
        _ => Ok(LabelRequirement {
            key,
            operator,
            values,
        }),
    }
}

pub(crate) fn parse_cidr(raw: &str, path: &str) -> Result<Cidr, ParseError> {
    raw.parse()
        .map_err(|err| ParseError::schema(path, format!("{err}")))
}

/// Build a CIDR block, rejecting `except` entries outside the block.
pub(crate) fn cidr_block(cidr: &str, except: &[String], path: &str) -> Result<CidrBlock, ParseError> {
    let cidr = parse_cidr(cidr, &join(path, "cidr"))?;
    let mut block = CidrBlock::new(cidr);
    for (i, raw) in except.iter().enumerate() {
        block
            .except
            .push(parse_cidr(raw, &index(&join(path, "except"), i))?);
    }
    if let Some(bad) = block.invalid_except() {
        return Err(ParseError::schema(
            join(path, "except"),
            format!("{bad} is not a proper subnet of {}", block.cidr),
        ));
    }
    Ok(block)
}

pub(crate) fn port_number(value: i64, path: &str) -> Result<u16, ParseError> {
    match u16::try_from(value) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ParseError::schema(
            path,
            format!("port {value} is outside 1-65535"),
        )),
    }
}

/// Resolve an `IntOrString` port into a number or a name.
pub(crate) enum RawPort {
    Number(u16),
    Named(String),
}

pub(crate) fn raw_port(port: &IntOrString, path: &str) -> Result<RawPort, ParseError> {
    match port {
        IntOrString::Int(n) => port_number(*n, path).map(RawPort::Number),
        IntOrString::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(ParseError::schema(path, "empty port"));
            }
            match s.parse::<i64>() {
                Ok(n) => port_number(n, path).map(RawPort::Number),
                Err(_) => Ok(RawPort::Named(s.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_stream, ParseErrorReason};
    use crate::model::Dialect;

    #[test]
    fn splits_streams_and_expands_lists() {
        let raw = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: networking.k8s.io/v1
    kind: NetworkPolicy
    metadata: {name: a, namespace: default}
    spec: {podSelector: {}}
  - apiVersion: networking.k8s.io/v1
    kind: NetworkPolicy
    metadata: {name: b, namespace: default}
    spec: {podSelector: {}}
---
---
apiVersion: cilium.io/v2
kind: CiliumNetworkPolicy
metadata: {name: c, namespace: default}
spec: {endpointSelector: {}}
"#;
        let docs = parse_stream(raw, None);
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| d.result.is_ok()));
        assert_eq!(docs[2].dialect, Some(Dialect::Cilium));
        assert_eq!(docs[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn rejects_dialect_mismatch_and_unknown_kinds() {
        let raw = r#"
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata: {name: a, namespace: default}
spec: {podSelector: {}}
---
apiVersion: v1
kind: ConfigMap
metadata: {name: cm}
"#;
        let docs = parse_stream(raw, Some(Dialect::Calico));
        assert_eq!(docs.len(), 2);
        let first = docs[0].result.as_ref().expect_err("dialect mismatch");
        assert_eq!(first.reason, ParseErrorReason::SchemaViolation);
        let second = docs[1].result.as_ref().expect_err("unknown kind");
        assert_eq!(second.reason, ParseErrorReason::UnsupportedField);
        assert_eq!(docs[1].name.as_deref(), Some("cm"));
    }

    #[test]
    fn yaml_syntax_error_is_one_rejection() {
        let docs = parse_stream("kind: [unclosed", None);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].result.is_err());
    }
}
