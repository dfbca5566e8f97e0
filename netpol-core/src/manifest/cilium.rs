use serde::{Deserialize, Serialize};

use super::{Extra, IntOrString, LabelSelector, ObjectMeta};
use crate::model::{DnsRule, HttpRule, KafkaRule};

pub const API_VERSION: &str = "cilium.io/v2";
pub const KIND_NAMESPACED: &str = "CiliumNetworkPolicy";
pub const KIND_CLUSTERWIDE: &str = "CiliumClusterwideNetworkPolicy";

/// `cilium.io/v2` CiliumNetworkPolicy or CiliumClusterwideNetworkPolicy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiliumPolicy {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CiliumPolicySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiliumPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Vec<CiliumIngressRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<Vec<CiliumEgressRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_deny: Option<Vec<CiliumIngressRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_deny: Option<Vec<CiliumEgressRule>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiliumIngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_endpoints: Option<Vec<LabelSelector>>,
    #[serde(default, rename = "fromCIDR", skip_serializing_if = "Option::is_none")]
    pub from_cidr: Option<Vec<String>>,
    #[serde(default, rename = "fromCIDRSet", skip_serializing_if = "Option::is_none")]
    pub from_cidr_set: Option<Vec<CidrRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_entities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ports: Option<Vec<CiliumPortRule>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiliumEgressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_endpoints: Option<Vec<LabelSelector>>,
    #[serde(default, rename = "toCIDR", skip_serializing_if = "Option::is_none")]
    pub to_cidr: Option<Vec<String>>,
    #[serde(default, rename = "toCIDRSet", skip_serializing_if = "Option::is_none")]
    pub to_cidr_set: Option<Vec<CidrRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_entities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ports: Option<Vec<CiliumPortRule>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Direction-neutral view of a Cilium rule's L3/L4 selectors.
#[derive(Debug, Clone, Copy)]
pub struct CiliumRuleView<'a> {
    pub endpoints: Option<&'a Vec<LabelSelector>>,
    pub cidr: Option<&'a Vec<String>>,
    pub cidr_set: Option<&'a Vec<CidrRule>>,
    pub entities: Option<&'a Vec<String>>,
    pub to_ports: Option<&'a Vec<CiliumPortRule>>,
    pub extra: &'a Extra,
}

impl CiliumRuleView<'_> {
    /// Number of distinct L3 selector families set on the rule.
    pub fn l3_kinds(&self) -> usize {
        let cidr = self.cidr.is_some_and(|c| !c.is_empty())
            || self.cidr_set.is_some_and(|c| !c.is_empty());
        [
            self.endpoints.is_some_and(|e| !e.is_empty()),
            cidr,
            self.entities.is_some_and(|e| !e.is_empty()),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

impl CiliumIngressRule {
    pub fn view(&self) -> CiliumRuleView<'_> {
        CiliumRuleView {
            endpoints: self.from_endpoints.as_ref(),
            cidr: self.from_cidr.as_ref(),
            cidr_set: self.from_cidr_set.as_ref(),
            entities: self.from_entities.as_ref(),
            to_ports: self.to_ports.as_ref(),
            extra: &self.extra,
        }
    }
}

impl CiliumEgressRule {
    pub fn view(&self) -> CiliumRuleView<'_> {
        CiliumRuleView {
            endpoints: self.to_endpoints.as_ref(),
            cidr: self.to_cidr.as_ref(),
            cidr_set: self.to_cidr_set.as_ref(),
            entities: self.to_entities.as_ref(),
            to_ports: self.to_ports.as_ref(),
            extra: &self.extra,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CidrRule {
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiliumPortRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<CiliumPortProtocol>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<CiliumL7Rules>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiliumPortProtocol {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiliumL7Rules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<Vec<HttpRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka: Option<Vec<KafkaRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<DnsRule>>,
    #[serde(flatten)]
    pub extra: Extra,
}
