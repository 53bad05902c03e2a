//! The remediator contract: something that consumes a resource demand and
//! reports what it could not cover.

pub mod asg;

use async_trait::async_trait;

use crate::error::Error;
use crate::resources::Resources;

/// A remediation pass that finished with demand outstanding.
///
/// Carries the residual alongside the failure so callers keep whatever
/// partial progress was made; dropping the residual on error would make the
/// next remediator in the pipeline re-provision capacity that was already
/// requested.
#[derive(Debug, thiserror::Error)]
#[error("{error} (still missing {residual})")]
pub struct Unmet {
    /// The demand still outstanding after the pass
    pub residual: Resources,
    /// The last failure observed while driving the pass
    #[source]
    pub error: Error,
}

/// Result of a remediation pass: `Ok` carries the residual demand (empty when
/// fully satisfied), `Err` carries the residual plus the last error seen.
pub type RemediateResult = std::result::Result<Resources, Unmet>;

/// Takes action to resolve a resource shortfall.
#[async_trait]
pub trait Remediator: Send + Sync {
    /// The name this remediator was registered under, for logs
    fn name(&self) -> &str;

    /// Attempt to provision capacity covering `need`.
    async fn remediate(&self, need: &Resources) -> RemediateResult;
}
