use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Peer, PolicyDocument, PortSpec, Protocol, TrafficRule};
use crate::parser::cilium::NAMESPACE_NAME_LABEL;

/// How the cluster DNS service is recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsOptions {
    /// Labels every DNS server pod carries.
    pub selector: BTreeMap<String, String>,
    /// Namespace the DNS pods run in.
    pub namespace: String,
    pub ports: Vec<u16>,
}

impl Default for DnsOptions {
    fn default() -> Self {
        Self {
            selector: BTreeMap::from([("k8s-app".to_string(), "kube-dns".to_string())]),
            namespace: "kube-system".to_string(),
            ports: vec![53],
        }
    }
}

/// True when `rule` only grants DNS traffic to the cluster DNS pods.
pub fn is_cluster_dns_rule(rule: &TrafficRule, doc: &PolicyDocument, dns: &DnsOptions) -> bool {
    if rule.peers.is_empty() || rule.ports.is_empty() || rule.l7.is_some() {
        return false;
    }
    let ports_match = rule.ports.iter().all(|p| {
        matches!(p.protocol, Protocol::Udp | Protocol::Tcp)
            && matches!(p.port, PortSpec::Number(n) if dns.ports.contains(&n))
    });
    ports_match && rule.peers.iter().all(|peer| is_dns_peer(peer, doc, dns))
}

fn is_dns_peer(peer: &Peer, doc: &PolicyDocument, dns: &DnsOptions) -> bool {
    let Peer::Endpoints(sel) = peer else {
        return false;
    };
    let labels_match = !dns.selector.is_empty()
        && dns
            .selector
            .iter()
            .all(|(k, v)| sel.pods.labels.get(k) == Some(v));
    let namespace_match = match &sel.namespaces {
        Some(ns) => {
            ns.is_empty()
                || (ns.expressions.is_empty()
                    && ns.labels.len() == 1
                    && ns.labels.get(NAMESPACE_NAME_LABEL) == Some(&dns.namespace))
        }
        None => doc.namespace.as_deref().map_or(true, |ns| ns == dns.namespace),
    };
    labels_match && namespace_match
}
