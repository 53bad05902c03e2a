//! The narrow slice of the AWS Auto Scaling API the remediator consumes.
//!
//! All SDK types stay behind [`AutoscalingApi`] and the plain view structs
//! here, so the remediation logic and its tests never touch the SDK.

pub mod client;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::Error;

pub use client::{resolve_region, AwsAutoscaling, DEFAULT_REGION};

/// Scaling activity status codes the remediator reasons about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityStatus {
    /// The last activity completed
    Successful,
    /// The last activity failed
    Failed,
    /// Instances are launched but not yet in service
    PreInService,
    /// A spot bid has been placed and awaits fulfillment
    PendingSpotBidPlacement,
    /// Waiting for a spot instance id
    WaitingForSpotInstanceId,
    /// Waiting for a spot instance request id
    WaitingForSpotInstanceRequestId,
    /// Any other code; imposes no constraint on remediation
    Other,
}

impl ActivityStatus {
    /// Map an API status-code string onto the variants we act on
    pub fn from_code(code: &str) -> Self {
        match code {
            "Successful" => Self::Successful,
            "Failed" => Self::Failed,
            "PreInService" => Self::PreInService,
            "PendingSpotBidPlacement" => Self::PendingSpotBidPlacement,
            "WaitingForSpotInstanceId" => Self::WaitingForSpotInstanceId,
            "WaitingForSpotInstanceRequestId" => Self::WaitingForSpotInstanceRequestId,
            _ => Self::Other,
        }
    }

    /// True for the codes that mean a spot bid is still being fulfilled
    pub fn is_spot_wait(&self) -> bool {
        matches!(
            self,
            Self::PendingSpotBidPlacement
                | Self::WaitingForSpotInstanceId
                | Self::WaitingForSpotInstanceRequestId
        )
    }
}

/// The most recent scaling activity recorded for a group.
#[derive(Clone, Debug)]
pub struct ScalingActivity {
    /// Status of the activity
    pub status: ActivityStatus,
}

/// Point-in-time view of an autoscaling group.
#[derive(Clone, Debug, Default)]
pub struct AutoscalingGroup {
    /// Group name
    pub name: String,
    /// Desired instance count the group is converging toward
    pub desired_capacity: i32,
    /// Hard upper bound on the group's instance count
    pub max_size: i32,
    /// Instances currently attached to the group
    pub instance_count: usize,
    /// Name of the launch configuration the group instantiates
    pub launch_configuration: Option<String>,
    /// Group tags
    pub tags: BTreeMap<String, String>,
}

/// The launch configuration details the remediator consumes.
#[derive(Clone, Debug)]
pub struct LaunchConfiguration {
    /// Configuration name
    pub name: String,
    /// EC2 instance type the configuration launches
    pub instance_type: Option<String>,
}

/// Operations against the cloud autoscaling service and the instance
/// metadata endpoint, abstracted for injection and mocking.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AutoscalingApi: Send + Sync {
    /// List every autoscaling group in the region
    async fn describe_groups(&self) -> Result<Vec<AutoscalingGroup>, Error>;

    /// Fetch a single group by name
    async fn describe_group(&self, name: &str) -> Result<AutoscalingGroup, Error>;

    /// The most recent scaling activity for a group, if any was recorded
    async fn last_activity(&self, group: &str) -> Result<Option<ScalingActivity>, Error>;

    /// Fetch a launch configuration by name
    async fn launch_configuration(&self, name: &str) -> Result<LaunchConfiguration, Error>;

    /// Name of the autoscaling group owning the given EC2 instance
    async fn group_for_instance(&self, instance_id: &str) -> Result<String, Error>;

    /// Set a group's desired capacity, with scale-in cooldown disabled
    async fn set_desired_capacity(&self, group: &str, capacity: i32) -> Result<(), Error>;

    /// Identity of the instance this controller runs on, from the metadata
    /// service
    async fn self_instance_id(&self) -> Result<String, Error>;
}
