//! A strategy pairs a predicate gate with an ordered remediator pipeline.
//!
//! Strategies partition the failing-pod set: each pod is served by the first
//! strategy whose every predicate accepts it, and later strategies only see
//! what earlier ones declined.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::error::Error;
use crate::predicate::PodPredicate;
use crate::remediator::{Remediator, Unmet};
use crate::resources::Resources;

/// A predicate-gated ordered pipeline of remediators.
pub struct Strategy {
    predicates: Vec<PodPredicate>,
    remediators: Vec<Box<dyn Remediator>>,
}

impl Strategy {
    /// Build a strategy; at least one remediator is required
    pub fn new(
        predicates: Vec<PodPredicate>,
        remediators: Vec<Box<dyn Remediator>>,
    ) -> Result<Self, Error> {
        if remediators.is_empty() {
            return Err(Error::config("strategy requires at least one remediator"));
        }
        Ok(Self {
            predicates,
            remediators,
        })
    }

    /// True iff every configured predicate accepts the pod (no predicates
    /// means every pod is accepted)
    pub fn accepts(&self, pod: &Pod) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(pod))
    }

    /// Partition `pods` into those this strategy takes responsibility for
    /// and the rest. Input order is preserved in both halves.
    pub fn filter(&self, pods: Vec<Arc<Pod>>) -> (Vec<Arc<Pod>>, Vec<Arc<Pod>>) {
        pods.into_iter().partition(|pod| self.accepts(pod))
    }

    /// Drive the remediators in declared order until the demand is covered.
    ///
    /// Remediator failures are logged and do not abort the pipeline; each
    /// remediator sees whatever residual its predecessors left. A non-empty
    /// residual after the last remediator is returned as [`Unmet`].
    pub async fn remediate(&self, demand: Resources) -> Result<(), Unmet> {
        let mut residual = demand;
        let mut last_error = None;

        for remediator in &self.remediators {
            info!(remediator = remediator.name(), %residual, "calling remediator");
            match remediator.remediate(&residual).await {
                Ok(remaining) => residual = remaining,
                Err(unmet) => {
                    warn!(
                        remediator = remediator.name(),
                        error = %unmet.error,
                        "remediator failed"
                    );
                    residual = unmet.residual;
                    last_error = Some(unmet.error);
                }
            }
            if residual.is_empty() {
                info!("all resources remediated");
                return Ok(());
            }
        }

        Err(Unmet {
            residual,
            error: last_error.unwrap_or(Error::Unremediated { residual }),
        })
    }
}
