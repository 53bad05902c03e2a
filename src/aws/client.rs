//! AWS SDK-backed implementation of [`AutoscalingApi`].
//!
//! Credentials come from the standard chain (environment, instance role,
//! shared credentials file). The region comes from `AWS_DEFAULT_REGION`,
//! then the instance metadata service, then a hardcoded default.

use async_trait::async_trait;

use aws_config::BehaviorVersion;
use aws_sdk_autoscaling::config::Region;
use aws_sdk_autoscaling::error::DisplayErrorContext;
use aws_sdk_autoscaling::Client;
use tracing::{info, warn};

use super::{
    ActivityStatus, AutoscalingApi, AutoscalingGroup, LaunchConfiguration, ScalingActivity,
};
use crate::error::Error;

/// Region used when neither the environment nor the metadata service can
/// name one
pub const DEFAULT_REGION: &str = "us-east-1";

const REGION_ENV: &str = "AWS_DEFAULT_REGION";
const IMDS_INSTANCE_ID: &str = "/latest/meta-data/instance-id";
const IMDS_REGION: &str = "/latest/meta-data/placement/region";

/// Resolve the AWS region: environment first, metadata service second,
/// [`DEFAULT_REGION`] as the last resort.
pub async fn resolve_region() -> String {
    if let Ok(region) = std::env::var(REGION_ENV) {
        if !region.is_empty() {
            info!(%region, "using region from environment");
            return region;
        }
    }

    let imds = aws_config::imds::Client::builder().build();
    match imds.get(IMDS_REGION).await {
        Ok(region) => {
            let region: String = region.into();
            info!(%region, "metadata service returned region");
            region
        }
        Err(err) => {
            warn!(
                error = %err,
                "unable to find region from the metadata service or the environment, using default {DEFAULT_REGION}"
            );
            DEFAULT_REGION.to_string()
        }
    }
}

/// Live autoscaling client, plus the metadata endpoint for self identity.
pub struct AwsAutoscaling {
    client: Client,
    imds: aws_config::imds::Client,
}

impl AwsAutoscaling {
    /// Build a client against the resolved region using the default
    /// credential chain
    pub async fn connect() -> Self {
        let region = resolve_region().await;
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;
        Self {
            client: Client::new(&config),
            imds: aws_config::imds::Client::builder().build(),
        }
    }
}

fn cloud_err(err: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::cloud(format!("{}", DisplayErrorContext(err)))
}

fn group_view(group: &aws_sdk_autoscaling::types::AutoScalingGroup) -> AutoscalingGroup {
    AutoscalingGroup {
        name: group
            .auto_scaling_group_name()
            .unwrap_or_default()
            .to_string(),
        desired_capacity: group.desired_capacity().unwrap_or_default(),
        max_size: group.max_size().unwrap_or_default(),
        instance_count: group.instances().len(),
        launch_configuration: group.launch_configuration_name().map(str::to_string),
        tags: group
            .tags()
            .iter()
            .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
            .collect(),
    }
}

#[async_trait]
impl AutoscalingApi for AwsAutoscaling {
    async fn describe_groups(&self) -> Result<Vec<AutoscalingGroup>, Error> {
        let mut groups = Vec::new();
        let mut pages = self
            .client
            .describe_auto_scaling_groups()
            .into_paginator()
            .items()
            .send();
        while let Some(group) = pages.next().await {
            let group = group.map_err(cloud_err)?;
            groups.push(group_view(&group));
        }
        Ok(groups)
    }

    async fn describe_group(&self, name: &str) -> Result<AutoscalingGroup, Error> {
        let output = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .max_records(1)
            .send()
            .await
            .map_err(cloud_err)?;
        output
            .auto_scaling_groups()
            .first()
            .map(group_view)
            .ok_or_else(|| Error::cloud(format!("autoscaling group {name} does not exist")))
    }

    async fn last_activity(&self, group: &str) -> Result<Option<ScalingActivity>, Error> {
        let output = self
            .client
            .describe_scaling_activities()
            .auto_scaling_group_name(group)
            .max_records(1)
            .send()
            .await
            .map_err(cloud_err)?;
        Ok(output.activities().first().map(|activity| ScalingActivity {
            status: activity
                .status_code()
                .map(|code| ActivityStatus::from_code(code.as_str()))
                .unwrap_or(ActivityStatus::Other),
        }))
    }

    async fn launch_configuration(&self, name: &str) -> Result<LaunchConfiguration, Error> {
        let output = self
            .client
            .describe_launch_configurations()
            .launch_configuration_names(name)
            .max_records(1)
            .send()
            .await
            .map_err(cloud_err)?;
        output
            .launch_configurations()
            .first()
            .map(|config| LaunchConfiguration {
                name: config
                    .launch_configuration_name()
                    .unwrap_or_default()
                    .to_string(),
                instance_type: config.instance_type().map(str::to_string),
            })
            .ok_or_else(|| Error::cloud(format!("no launch configuration named {name}")))
    }

    async fn group_for_instance(&self, instance_id: &str) -> Result<String, Error> {
        let output = self
            .client
            .describe_auto_scaling_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(cloud_err)?;
        let instances = output.auto_scaling_instances();
        if instances.len() != 1 {
            return Err(Error::metadata(format!(
                "expected one autoscaling instance for {instance_id}, found {}",
                instances.len()
            )));
        }
        instances[0]
            .auto_scaling_group_name()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::metadata(format!("instance {instance_id} reports no autoscaling group"))
            })
    }

    async fn set_desired_capacity(&self, group: &str, capacity: i32) -> Result<(), Error> {
        self.client
            .set_desired_capacity()
            .auto_scaling_group_name(group)
            .desired_capacity(capacity)
            .honor_cooldown(false)
            .send()
            .await
            .map_err(cloud_err)?;
        info!(%group, capacity, "requested group be set to capacity");
        Ok(())
    }

    async fn self_instance_id(&self) -> Result<String, Error> {
        self.imds
            .get(IMDS_INSTANCE_ID)
            .await
            .map(Into::into)
            .map_err(|err| Error::metadata(err.to_string()))
    }
}
