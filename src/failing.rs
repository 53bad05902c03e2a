//! The working set of pods considered stuck pending.
//!
//! Shared between the pod watch task (which evicts deleted pods) and the
//! reconciliation tick (which refreshes membership and drives remediation).
//! A single mutex guards all state; every public operation is atomic and no
//! lock is ever held across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

/// A stuck pod plus the number of remediation passes it has lived through.
#[derive(Clone, Debug)]
struct FailedPod {
    pod: Arc<Pod>,
    remediations: u32,
}

/// Synchronized map of stuck pods, keyed by `namespace/name`.
#[derive(Debug, Default)]
pub struct FailingPods {
    inner: Mutex<HashMap<String, FailedPod>>,
}

/// The `namespace/name` key a pod is tracked under.
pub fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

impl FailingPods {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a pod. Re-adding an already tracked key replaces the snapshot
    /// and resets its remediation counter.
    pub fn add(&self, key: &str, pod: Arc<Pod>) {
        debug!(pod = %key, "adding pod to failing set");
        let mut inner = self.inner.lock().expect("failing pods lock poisoned");
        inner.insert(
            key.to_string(),
            FailedPod {
                pod,
                remediations: 0,
            },
        );
    }

    /// Remove a pod if tracked; a no-op otherwise
    pub fn remove(&self, key: &str) {
        debug!(pod = %key, "removing pod from failing set if present");
        let mut inner = self.inner.lock().expect("failing pods lock poisoned");
        inner.remove(key);
    }

    /// True when the key is currently tracked
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("failing pods lock poisoned")
            .contains_key(key)
    }

    /// Number of tracked pods
    pub fn len(&self) -> usize {
        self.inner.lock().expect("failing pods lock poisoned").len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detached snapshot of the tracked pods, safe to iterate without the
    /// lock. Order is unspecified.
    pub fn pods(&self) -> Vec<Arc<Pod>> {
        let inner = self.inner.lock().expect("failing pods lock poisoned");
        inner.values().map(|failed| failed.pod.clone()).collect()
    }

    /// Detached snapshot of the tracked keys
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("failing pods lock poisoned");
        inner.keys().cloned().collect()
    }

    /// Bump every tracked pod's remediation counter by one
    pub fn increment_remediations(&self) {
        let mut inner = self.inner.lock().expect("failing pods lock poisoned");
        for failed in inner.values_mut() {
            failed.remediations += 1;
        }
    }

    /// Remediation counter for a tracked pod, if present
    pub fn remediations(&self, key: &str) -> Option<u32> {
        let inner = self.inner.lock().expect("failing pods lock poisoned");
        inner.get(key).map(|failed| failed.remediations)
    }
}
