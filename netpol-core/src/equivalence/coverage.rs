//! Conservative containment checks.
//!
//! Every `covers(a, b)` answers "does `a` admit at least everything `b`
//! admits?". A `false` may be a false alarm; a `true` never is.

use crate::model::{
    CidrBlock, Entity, L7Rules, LabelMatch, PortRule, PortSpec, Protocol, SelectorOperator,
};

/// A peer with its namespace scope made explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScopedPeer {
    /// Any peer at all: an empty peer list or the `all` entity.
    Any,
    Endpoints { pods: LabelMatch, namespaces: LabelMatch },
    Cidr(CidrBlock),
    Entity(Entity),
}

pub(crate) fn peer_covers(a: &ScopedPeer, b: &ScopedPeer) -> bool {
    match (a, b) {
        (ScopedPeer::Any, _) => true,
        (_, ScopedPeer::Any) => false,
        (
            ScopedPeer::Endpoints {
                pods: a_pods,
                namespaces: a_ns,
            },
            ScopedPeer::Endpoints {
                pods: b_pods,
                namespaces: b_ns,
            },
        ) => match_covers(a_pods, b_pods) && match_covers(a_ns, b_ns),
        (ScopedPeer::Entity(Entity::Cluster), ScopedPeer::Endpoints { .. }) => true,
        (ScopedPeer::Cidr(a), ScopedPeer::Cidr(b)) => cidr_covers(a, b),
        (ScopedPeer::Entity(a), ScopedPeer::Entity(b)) => a == b,
        _ => false,
    }
}

/// True when every label set matched by `b` is also matched by `a`.
pub(crate) fn match_covers(a: &LabelMatch, b: &LabelMatch) -> bool {
    let labels_implied = a.labels.iter().all(|(key, value)| {
        b.labels.get(key) == Some(value)
            || b.expressions.iter().any(|req| {
                req.key == *key
                    && req.operator == SelectorOperator::In
                    && req.values.len() == 1
                    && req.values.contains(value)
            })
    });
    labels_implied
        && a.expressions.iter().all(|req| {
            let pinned = b.labels.get(&req.key);
            let on_key = || b.expressions.iter().filter(|other| other.key == req.key);
            match req.operator {
                SelectorOperator::In => {
                    pinned.is_some_and(|v| req.values.contains(v))
                        || on_key().any(|other| {
                            other.operator == SelectorOperator::In
                                && other.values.is_subset(&req.values)
                        })
                }
                SelectorOperator::NotIn => {
                    pinned.is_some_and(|v| !req.values.contains(v))
                        || on_key().any(|other| match other.operator {
                            SelectorOperator::In => other.values.is_disjoint(&req.values),
                            SelectorOperator::NotIn => other.values.is_superset(&req.values),
                            SelectorOperator::DoesNotExist => true,
                            SelectorOperator::Exists => false,
                        })
                }
                SelectorOperator::Exists => {
                    pinned.is_some()
                        || on_key().any(|other| {
                            matches!(other.operator, SelectorOperator::Exists | SelectorOperator::In)
                        })
                }
                SelectorOperator::DoesNotExist => {
                    on_key().any(|other| other.operator == SelectorOperator::DoesNotExist)
                }
            }
        })
}

/// `a` contains `b` once both sets of exceptions are taken into account.
pub(crate) fn cidr_covers(a: &CidrBlock, b: &CidrBlock) -> bool {
    a.cidr.contains(&b.cidr)
        && a.except.iter().all(|hole| {
            !hole.overlaps(&b.cidr) || b.except.iter().any(|b_hole| b_hole.contains(hole))
        })
}

pub(crate) fn port_covers(a: &PortRule, b: &PortRule) -> bool {
    let protocol = a.protocol == Protocol::Any || a.protocol == b.protocol;
    let port = match (&a.port, &b.port) {
        (PortSpec::Any, _) => true,
        (_, PortSpec::Any) => false,
        (PortSpec::Number(x), PortSpec::Number(y)) => x == y,
        (PortSpec::Number(x), PortSpec::Range(s, e)) => s == x && e == x,
        (PortSpec::Range(s, e), PortSpec::Number(y)) => s <= y && y <= e,
        (PortSpec::Range(s, e), PortSpec::Range(s2, e2)) => s <= s2 && e2 <= e,
        (PortSpec::Named(x), PortSpec::Named(y)) => x == y,
        _ => false,
    };
    protocol && port
}

pub(crate) fn l7_covers(a: Option<&L7Rules>, b: Option<&L7Rules>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a == b,
    }
}
