use serde::{Deserialize, Serialize};

use super::{Extra, IntOrString, ObjectMeta};

/// Calico `NetworkPolicy` or `GlobalNetworkPolicy` (v3 API or CRD form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalicoPolicy {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CalicoPolicySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalicoPolicySpec {
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    /// Only valid on GlobalNetworkPolicy.
    #[serde(default)]
    pub namespace_selector: Option<String>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub ingress: Option<Vec<CalicoRule>>,
    #[serde(default)]
    pub egress: Option<Vec<CalicoRule>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalicoRule {
    pub action: String,
    #[serde(default)]
    pub protocol: Option<IntOrString>,
    #[serde(default)]
    pub source: Option<CalicoEntityRule>,
    #[serde(default)]
    pub destination: Option<CalicoEntityRule>,
    /// Rule annotations; informational only.
    #[serde(default)]
    pub metadata: Option<serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalicoEntityRule {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub namespace_selector: Option<String>,
    #[serde(default)]
    pub nets: Vec<String>,
    #[serde(default)]
    pub not_nets: Vec<String>,
    #[serde(default)]
    pub ports: Vec<IntOrString>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl CalicoEntityRule {
    pub fn has_peer_fields(&self) -> bool {
        self.selector.is_some()
            || self.namespace_selector.is_some()
            || !self.nets.is_empty()
            || !self.not_nets.is_empty()
    }
}
