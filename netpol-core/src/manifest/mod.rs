//! Serde shapes of the raw policy resources.
//!
//! These mirror the YAML the user feeds in. Fields the model cannot express
//! are collected in `extra` maps so parsers can reject them by name instead
//! of dropping them. The Cilium types are also what the writer serializes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod calico;
pub mod cilium;
pub mod kubernetes;

pub use calico::{CalicoEntityRule, CalicoPolicy, CalicoPolicySpec, CalicoRule};
pub use cilium::{
    CidrRule, CiliumEgressRule, CiliumIngressRule, CiliumL7Rules, CiliumPolicy, CiliumPolicySpec,
    CiliumPortProtocol, CiliumPortRule,
};
pub use kubernetes::{
    IpBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};

/// Unrecognised keys captured during deserialization.
pub type Extra = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Kubernetes `metav1.LabelSelector`, shared by all three dialects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Kubernetes `IntOrString`, used for ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i64),
    String(String),
}
