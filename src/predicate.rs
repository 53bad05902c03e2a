//! Pod predicates used to gate remediation strategies.
//!
//! A strategy only takes responsibility for the pods that every one of its
//! configured predicates accepts. The set of predicates is closed and known
//! at config-parse time, so they are tagged variants rather than trait
//! objects.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;

/// A condition a pod must meet before a strategy will remediate it.
#[derive(Clone, Debug, PartialEq)]
pub enum PodPredicate {
    /// The pod's namespace must be one of a configured set
    Namespace(NamespacePredicate),
    /// The pod's node selector must include every configured label pair
    NodeSelector(NodeSelectorPredicate),
}

impl PodPredicate {
    /// True iff the pod satisfies this predicate
    pub fn matches(&self, pod: &Pod) -> bool {
        match self {
            Self::Namespace(p) => p.matches(pod),
            Self::NodeSelector(p) => p.matches(pod),
        }
    }
}

/// Accepts pods whose namespace belongs to a configured set.
///
/// Equality is set equality; the order namespaces were listed in does not
/// matter.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct NamespacePredicate {
    namespaces: BTreeSet<String>,
}

impl NamespacePredicate {
    /// Build from any iterable of namespace names
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    /// True iff the pod lives in one of the configured namespaces
    pub fn matches(&self, pod: &Pod) -> bool {
        pod.metadata
            .namespace
            .as_ref()
            .is_some_and(|ns| self.namespaces.contains(ns))
    }
}

/// Accepts pods whose declared node selector is a superset of the configured
/// label map: every configured `(key, value)` pair must be present verbatim.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct NodeSelectorPredicate {
    keys: BTreeMap<String, String>,
}

impl NodeSelectorPredicate {
    /// Build from any iterable of label pairs
    pub fn new<I, K, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// True iff the pod's node selector carries every configured pair
    pub fn matches(&self, pod: &Pod) -> bool {
        let selector = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_selector.as_ref());
        match selector {
            Some(selector) => self
                .keys
                .iter()
                .all(|(key, value)| selector.get(key) == Some(value)),
            None => self.keys.is_empty(),
        }
    }
}
