//! Dialect-neutral policy representation.
//!
//! Every parser resolves its dialect's raw YAML into these types, and the
//! translator, writer and validator only ever look at them. Values are built
//! once per conversion run and never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::cidr::Cidr;

/// Policy dialect a document was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Kubernetes,
    Calico,
    Cilium,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Kubernetes, Dialect::Calico, Dialect::Cilium];

    /// Identify the dialect from a document's `apiVersion` and `kind`.
    pub fn detect(api_version: &str, kind: &str) -> Option<Dialect> {
        let group = api_version.split('/').next().unwrap_or_default();
        match (group, kind) {
            ("networking.k8s.io", "NetworkPolicy") => Some(Dialect::Kubernetes),
            ("projectcalico.org" | "crd.projectcalico.org", "NetworkPolicy")
            | ("projectcalico.org" | "crd.projectcalico.org", "GlobalNetworkPolicy") => {
                Some(Dialect::Calico)
            }
            ("cilium.io", "CiliumNetworkPolicy" | "CiliumClusterwideNetworkPolicy") => {
                Some(Dialect::Cilium)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Kubernetes => "kubernetes",
            Dialect::Calico => "calico",
            Dialect::Cilium => "cilium",
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic direction relative to the selected workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule does with matching traffic. Only Calico and Cilium deny
/// policies produce anything but `Allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
    Pass,
    Log,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "Allow",
            RuleAction::Deny => "Deny",
            RuleAction::Pass => "Pass",
            RuleAction::Log => "Log",
        }
    }
}

/// Whether a policy selects pods or nodes (host endpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Pods,
    Nodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl SelectorOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "In" => Some(SelectorOperator::In),
            "NotIn" => Some(SelectorOperator::NotIn),
            "Exists" => Some(SelectorOperator::Exists),
            "DoesNotExist" => Some(SelectorOperator::DoesNotExist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorOperator::In => "In",
            SelectorOperator::NotIn => "NotIn",
            SelectorOperator::Exists => "Exists",
            SelectorOperator::DoesNotExist => "DoesNotExist",
        }
    }
}

/// A set-based label requirement (`key In (a, b)`, `has(key)`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub values: BTreeSet<String>,
}

/// Label constraints that must all hold. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelMatch {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<LabelRequirement>,
}

impl LabelMatch {
    /// Build a match in canonical form (expressions sorted, duplicates removed).
    pub fn new(labels: BTreeMap<String, String>, mut expressions: Vec<LabelRequirement>) -> Self {
        expressions.sort();
        expressions.dedup();
        Self {
            labels,
            expressions,
        }
    }

    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            expressions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.expressions.is_empty()
    }
}

/// Pod selector with optional namespace scoping.
///
/// `namespaces: None` means the policy's own namespace for namespaced
/// policies and any namespace for cluster-wide ones. `Some(empty)` means
/// every namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicySelector {
    pub pods: LabelMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<LabelMatch>,
}

impl PolicySelector {
    pub fn pods(pods: LabelMatch) -> Self {
        Self {
            pods,
            namespaces: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty() && self.namespaces.is_none()
    }
}

/// A CIDR with narrower ranges carved out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidrBlock {
    pub cidr: Cidr,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<Cidr>,
}

impl CidrBlock {
    pub fn new(cidr: Cidr) -> Self {
        Self {
            cidr,
            except: Vec::new(),
        }
    }

    /// First `except` entry that is not a proper subnet of `cidr`, if any.
    pub fn invalid_except(&self) -> Option<&Cidr> {
        self.except
            .iter()
            .find(|exc| !exc.is_proper_subnet_of(&self.cidr))
    }
}

/// Cilium reserved identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Entity {
    World,
    Host,
    RemoteNode,
    Cluster,
    All,
    KubeApiserver,
    Health,
    Init,
    Ingress,
    Unmanaged,
}

impl Entity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "world" => Some(Entity::World),
            "host" => Some(Entity::Host),
            "remote-node" => Some(Entity::RemoteNode),
            "cluster" => Some(Entity::Cluster),
            "all" => Some(Entity::All),
            "kube-apiserver" => Some(Entity::KubeApiserver),
            "health" => Some(Entity::Health),
            "init" => Some(Entity::Init),
            "ingress" => Some(Entity::Ingress),
            "unmanaged" => Some(Entity::Unmanaged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::World => "world",
            Entity::Host => "host",
            Entity::RemoteNode => "remote-node",
            Entity::Cluster => "cluster",
            Entity::All => "all",
            Entity::KubeApiserver => "kube-apiserver",
            Entity::Health => "health",
            Entity::Init => "init",
            Entity::Ingress => "ingress",
            Entity::Unmanaged => "unmanaged",
        }
    }
}

/// One element of a rule's peer list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Peer {
    Endpoints(PolicySelector),
    Cidr(CidrBlock),
    Entity { entity: Entity },
}

impl Peer {
    pub fn kind(&self) -> PeerKind {
        match self {
            Peer::Endpoints(_) => PeerKind::Endpoints,
            Peer::Cidr(_) => PeerKind::Cidr,
            Peer::Entity { .. } => PeerKind::Entity,
        }
    }
}

/// L3 selector family of a peer. Cilium allows one family per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    Endpoints,
    Cidr,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    Any,
}

impl Protocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            "SCTP" => Some(Protocol::Sctp),
            "ANY" => Some(Protocol::Any),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
            Protocol::Any => "ANY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSpec {
    Any,
    Number(u16),
    Range(u16, u16),
    /// A container port name; only resolvable against live pods.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRule {
    pub protocol: Protocol,
    pub port: PortSpec,
}

impl PortRule {
    pub fn new(protocol: Protocol, port: PortSpec) -> Self {
        Self { protocol, port }
    }

    pub fn named_port(&self) -> Option<&str> {
        match &self.port {
            PortSpec::Named(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KafkaRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, rename = "clientID", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DnsRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_pattern: Option<String>,
}

/// Application-layer constraints attached to a rule's ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L7Rules {
    Http(Vec<HttpRule>),
    Kafka(Vec<KafkaRule>),
    Dns(Vec<DnsRule>),
}

/// One directional rule. Empty `peers` means all peers, empty `ports` all
/// ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRule {
    pub action: RuleAction,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default)]
    pub ports: Vec<PortRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l7: Option<L7Rules>,
}

impl TrafficRule {
    pub fn allow(peers: Vec<Peer>, ports: Vec<PortRule>) -> Self {
        Self {
            action: RuleAction::Allow,
            peers,
            ports,
            l7: None,
        }
    }

    pub fn is_allow(&self) -> bool {
        self.action == RuleAction::Allow
    }

    pub fn named_ports(&self) -> impl Iterator<Item = &str> {
        self.ports.iter().filter_map(PortRule::named_port)
    }
}

/// A fully resolved network policy in any dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    /// `None` for cluster-wide policies.
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub workload: WorkloadKind,
    pub pod_selector: PolicySelector,
    pub policy_types: BTreeSet<Direction>,
    #[serde(default)]
    pub ingress: Vec<TrafficRule>,
    #[serde(default)]
    pub egress: Vec<TrafficRule>,
    pub source_dialect: Dialect,
    /// Original resource kind, e.g. `GlobalNetworkPolicy`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl PolicyDocument {
    pub fn rules(&self, direction: Direction) -> &[TrafficRule] {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    pub fn declares(&self, direction: Direction) -> bool {
        self.policy_types.contains(&direction)
    }

    pub fn is_clusterwide(&self) -> bool {
        self.namespace.is_none()
    }

    /// `namespace/name`, or just `name` for cluster-wide policies.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}
