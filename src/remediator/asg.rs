//! Autoscaling-group remediator.
//!
//! Translates a resource shortfall into desired-capacity increases across
//! one or more AWS autoscaling groups. Candidate groups are selected by name
//! or by tag, ordered by their `scaler_priority` tag, and tried in turn
//! until the demand is covered or the candidates run out. Each attempt is
//! gated on the group's most recent scaling activity so we never pile a new
//! capacity request onto a group that is already stuck or mid-launch.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::aws::{AutoscalingApi, AutoscalingGroup};
use crate::error::Error;
use crate::remediator::{RemediateResult, Remediator, Unmet};
use crate::resources::Resources;

/// Name the remediator registers under in config files
pub const REMEDIATOR_NAME: &str = "autoScalingGroup";

/// Tag whose integer value orders candidate groups (higher wins)
pub const PRIORITY_TAG_KEY: &str = "scaler_priority";

/// How long a group in a spot-wait state is given to grow before the
/// attempt is abandoned
const SPOT_WAIT: Duration = Duration::from_secs(2 * 60);

/// Configuration for the [`AsgRemediator`], as it appears under an
/// `autoScalingGroup` entry in the strategy file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AsgConfig {
    /// Group names to select outright
    pub names: Vec<String>,
    /// Tag pairs a group must carry, all of them, to be selected
    pub tags: BTreeMap<String, String>,
    /// Tag keys to read off the group owning this controller's own instance
    /// and merge into `tags` at remediation time
    pub self_tags: Vec<String>,
    /// Cap on instances added to a single group per invocation
    pub max_machine_increment: Option<i64>,
    /// When the cap above is hit, report the demand as fully met so the
    /// pipeline stops for this tick instead of spilling into other groups
    pub stop_if_maximally_incremented: bool,
}

/// Remediates resource shortfalls by growing autoscaling groups.
pub struct AsgRemediator {
    config: AsgConfig,
    api: Arc<dyn AutoscalingApi>,
    spot_wait: Duration,
}

impl AsgRemediator {
    /// Build a remediator over the given API handle
    pub fn new(config: AsgConfig, api: Arc<dyn AutoscalingApi>) -> Self {
        Self {
            config,
            api,
            spot_wait: SPOT_WAIT,
        }
    }

    /// The tag map used for group selection: configured tags overlaid with
    /// the values of `selfTags` read from this controller's own group.
    /// Any failure here is fatal for the invocation.
    async fn working_tags(&self) -> Result<BTreeMap<String, String>, Error> {
        let mut tags = self.config.tags.clone();
        if self.config.self_tags.is_empty() {
            return Ok(tags);
        }

        let instance_id = self.api.self_instance_id().await?;
        let group_name = self.api.group_for_instance(&instance_id).await?;
        let group = self.api.describe_group(&group_name).await?;
        for key in &self.config.self_tags {
            match group.tags.get(key) {
                Some(value) => {
                    tags.insert(key.clone(), value.clone());
                }
                None => {
                    return Err(Error::metadata(format!(
                        "self tag {key} not present on group {group_name}"
                    )));
                }
            }
        }
        Ok(tags)
    }

    fn select_candidates(
        &self,
        groups: Vec<AutoscalingGroup>,
        tags: &BTreeMap<String, String>,
    ) -> Vec<AutoscalingGroup> {
        groups
            .into_iter()
            .filter(|group| {
                if self.config.names.contains(&group.name) {
                    debug!(group = %group.name, "found matching autoscaling group name");
                    return true;
                }
                if all_tags_present(&group.tags, tags) {
                    debug!(group = %group.name, "found autoscaling group matching all tags");
                    return true;
                }
                false
            })
            .collect()
    }

    async fn attempt_remediate(
        &self,
        group: &AutoscalingGroup,
        need: &Resources,
    ) -> Result<Resources, Error> {
        if group.desired_capacity >= group.max_size {
            return Err(Error::cloud(format!(
                "autoscaling group {} already at max size",
                group.name
            )));
        }

        let mut group = group.clone();
        match self.api.last_activity(&group.name).await {
            Ok(Some(activity)) => {
                use crate::aws::ActivityStatus;

                if activity.status == ActivityStatus::Failed
                    && group.desired_capacity as usize > group.instance_count
                {
                    return Err(Error::cloud(format!(
                        "group {} last activity failed and desired count exceeds current count, assuming the worst",
                        group.name
                    )));
                }

                if activity.status == ActivityStatus::PreInService {
                    return Err(Error::cloud(format!(
                        "autoscaling group {} in pre service",
                        group.name
                    )));
                }

                if activity.status.is_spot_wait() {
                    info!(
                        group = %group.name,
                        wait_secs = self.spot_wait.as_secs(),
                        "group is waiting on spot work, allowing time for instance increase"
                    );
                    let before = group.instance_count;
                    tokio::time::sleep(self.spot_wait).await;
                    group = self.api.describe_group(&group.name).await?;
                    if group.instance_count <= before {
                        return Err(Error::cloud(format!(
                            "spot increase for group {} seems to have failed",
                            group.name
                        )));
                    }
                }
            }
            Ok(None) => debug!(group = %group.name, "no scaling activity recorded"),
            Err(err) => warn!(group = %group.name, error = %err, "could not get current group activity"),
        }

        let capacity_per_machine = match &group.launch_configuration {
            Some(name) => match self.api.launch_configuration(name).await {
                Ok(config) => config
                    .instance_type
                    .as_deref()
                    .map(instance_capacity)
                    .unwrap_or(Resources::EMPTY),
                Err(err) => {
                    warn!(group = %group.name, error = %err, "could not fetch launch configuration");
                    Resources::EMPTY
                }
            },
            None => Resources::EMPTY,
        };

        let (count, capacity_per_machine) = servers_for_capacity(&capacity_per_machine, need);
        info!(group = %group.name, count, "servers needed from group");

        let mut needed = count;
        let mut increment_capped = false;
        if let Some(max_increment) = self.config.max_machine_increment {
            if needed >= max_increment {
                needed = max_increment;
                increment_capped = true;
                info!(group = %group.name, max_increment, "machine increment capped");
            }
        }

        let headroom = group.max_size as i64 - group.instance_count as i64;
        if needed > headroom {
            needed = headroom;
            info!(group = %group.name, "desired capacity too large, clamping to max size");
        }

        let target = (group.instance_count as i64 + needed) as i32;
        self.api.set_desired_capacity(&group.name, target).await?;
        info!(group = %group.name, capacity = target, "requested group capacity increase");

        let added = capacity_per_machine.scale(needed);
        if added.is_empty() {
            warn!(
                group = %group.name,
                "unable to determine how many resources were created, optimistically assuming the demand is met"
            );
            return Ok(Resources::EMPTY);
        }

        if increment_capped && self.config.stop_if_maximally_incremented {
            return Ok(Resources::EMPTY);
        }

        Ok(need.saturating_remove(&added))
    }
}

#[async_trait]
impl Remediator for AsgRemediator {
    fn name(&self) -> &str {
        REMEDIATOR_NAME
    }

    async fn remediate(&self, need: &Resources) -> RemediateResult {
        let unmet = |error: Error| Unmet {
            residual: *need,
            error,
        };

        let tags = self.working_tags().await.map_err(unmet)?;
        let groups = self.api.describe_groups().await.map_err(unmet)?;
        let mut candidates = self.select_candidates(groups, &tags);
        if candidates.is_empty() {
            return Err(unmet(Error::cloud("no matching autoscaling groups found")));
        }
        sort_by_priority(&mut candidates);

        let mut residual = *need;
        let mut last_error = None;
        for group in &candidates {
            info!(group = %group.name, "attempting to remediate using group");
            match self.attempt_remediate(group, &residual).await {
                Ok(remaining) => {
                    residual = remaining;
                    if residual.is_empty() {
                        info!("remediation successful");
                        break;
                    }
                    info!(
                        group = %group.name,
                        %residual,
                        "group did not fully meet resource need"
                    );
                }
                Err(err) => {
                    warn!(group = %group.name, error = %err, "failed remediation attempt");
                    last_error = Some(err);
                }
            }
        }

        if residual.is_empty() {
            Ok(residual)
        } else {
            Err(Unmet {
                residual,
                error: last_error.unwrap_or(Error::Unremediated { residual }),
            })
        }
    }
}

/// True iff the group carries every wanted tag with the exact value. An
/// empty wanted map matches nothing; otherwise a bare `tags:` entry would
/// select every group in the region.
fn all_tags_present(
    group_tags: &BTreeMap<String, String>,
    wanted: &BTreeMap<String, String>,
) -> bool {
    !wanted.is_empty() && wanted.iter().all(|(key, value)| group_tags.get(key) == Some(value))
}

fn priority(group: &AutoscalingGroup) -> i64 {
    match group.tags.get(PRIORITY_TAG_KEY) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(group = %group.name, value = %raw, "unparseable {PRIORITY_TAG_KEY} tag, treating as 0");
            0
        }),
        None => 0,
    }
}

/// Order groups by descending priority. The sort is stable: groups with
/// equal priority keep their input order.
fn sort_by_priority(groups: &mut [AutoscalingGroup]) {
    groups.sort_by_key(|group| Reverse(priority(group)));
}

/// Per-machine capacity of the known instance types. Unknown types map to
/// EMPTY, which flows into the optimistic single-node path below.
fn instance_capacity(instance_type: &str) -> Resources {
    static CAPACITY: OnceLock<HashMap<&'static str, Resources>> = OnceLock::new();
    let table = CAPACITY.get_or_init(|| {
        HashMap::from([
            ("c4.2xlarge", Resources::new(8000, 15000)),
            ("c4.4xlarge", Resources::new(16000, 30000)),
            ("m4.2xlarge", Resources::new(8000, 32000)),
            ("m4.4xlarge", Resources::new(16000, 64000)),
        ])
    });
    match table.get(instance_type) {
        Some(capacity) => *capacity,
        None => {
            warn!(%instance_type, "could not find instance type");
            Resources::EMPTY
        }
    }
}

/// How many machines of the given per-machine capacity cover `need`, and
/// the capacity actually credited per machine. With unknown capacity (or a
/// zero demand) a single optimistic node is requested and nothing is
/// credited, so the caller falls into the optimistic EMPTY-residual path.
fn servers_for_capacity(per_machine: &Resources, need: &Resources) -> (i64, Resources) {
    if per_machine.cpu <= 0 || per_machine.mem_mb <= 0 {
        return (1, Resources::EMPTY);
    }

    let by_cpu = div_ceil(need.cpu, per_machine.cpu);
    let by_mem = div_ceil(need.mem_mb, per_machine.mem_mb);
    let count = by_cpu.max(by_mem);
    if count == 0 {
        return (1, Resources::EMPTY);
    }
    (count, *per_machine)
}

fn div_ceil(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}
