//! Read-only view of the cluster's pod listing.
//!
//! The live cache is maintained by a kube-rs reflector driven from a watch
//! stream; the controller only ever reads it and treats every entry as an
//! immutable snapshot. The trait exists so the reconciler can be exercised
//! against an in-memory pod set in tests.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::Store;

/// Read-only access to the orchestrator's pod set.
pub trait PodCache: Send + Sync {
    /// Snapshot of every pod currently known to the watch client.
    fn pods(&self) -> Vec<Arc<Pod>>;
}

impl PodCache for Store<Pod> {
    fn pods(&self) -> Vec<Arc<Pod>> {
        self.state()
    }
}
