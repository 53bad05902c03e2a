//! The reconciliation loop.
//!
//! One tick: refresh the failing-pod set from the pod cache, then walk the
//! strategy pipeline over a detached snapshot of that set. Ticks run to
//! completion before the next one starts; the pod cache is updated
//! concurrently by the watch task and a tick simply operates on whatever it
//! observes at reconcile time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, warn};

use crate::cache::PodCache;
use crate::demand::needed_resources;
use crate::failing::{pod_key, FailingPods};
use crate::strategy::Strategy;

/// Ties the pod cache, the failing-pod set, and the strategies together and
/// owns the tick timer.
pub struct Controller<C> {
    cache: C,
    failing: Arc<FailingPods>,
    strategies: Vec<Strategy>,
    interval: Duration,
}

/// A pod is "fine" when it is not a scheduling failure: it has left the
/// pending phase, or it is pending but already placed and pulling images
/// (any container waiting with reason `ContainerCreating`).
pub fn is_pod_fine(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return true;
    };
    if status.phase.as_deref() != Some("Pending") {
        return true;
    }
    status
        .container_statuses
        .iter()
        .flatten()
        .any(|container| {
            container
                .state
                .as_ref()
                .and_then(|state| state.waiting.as_ref())
                .and_then(|waiting| waiting.reason.as_deref())
                == Some("ContainerCreating")
        })
}

fn created_before(pod: &Pod, cutoff: DateTime<Utc>) -> bool {
    pod.metadata
        .creation_timestamp
        .as_ref()
        .is_some_and(|created| created.0 < cutoff)
}

impl<C: PodCache> Controller<C> {
    /// Create a controller ticking every `interval`
    pub fn new(
        cache: C,
        failing: Arc<FailingPods>,
        strategies: Vec<Strategy>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            failing,
            strategies,
            interval,
        }
    }

    /// Refresh the failing-pod set against the current cache contents.
    ///
    /// Additions run strictly before removals so a pod that just became
    /// stuck is never dropped by the same pass that found it.
    pub fn reconcile(&self) {
        self.reconcile_at(Utc::now());
    }

    fn reconcile_at(&self, now: DateTime<Utc>) {
        let pods = self.cache.pods();
        debug!(pods = pods.len(), "reconciling failing pods against cache");
        let cutoff = now
            - chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero());
        debug!(%cutoff, "pods must have been created before cutoff");

        for pod in &pods {
            let pending = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                == Some("Pending");
            if pending && created_before(pod, cutoff) && !is_pod_fine(pod) {
                self.failing.add(&pod_key(pod), pod.clone());
            }
        }

        let by_key: HashMap<String, &Arc<Pod>> =
            pods.iter().map(|pod| (pod_key(pod), pod)).collect();
        for key in self.failing.keys() {
            match by_key.get(&key) {
                None => self.failing.remove(&key),
                Some(pod) if is_pod_fine(pod) => self.failing.remove(&key),
                Some(_) => {}
            }
        }
        debug!(failing = self.failing.len(), "reconciliation finished");
    }

    /// Run one remediation pass: reconcile, then feed the failing set
    /// through the strategies in declared order. Each pod is served by the
    /// first strategy that accepts it.
    pub async fn tick(&self) {
        self.reconcile();

        if self.failing.is_empty() {
            debug!("no pods in need of remediation");
            return;
        }

        warn!(
            pods = self.failing.len(),
            "pods in need of remediation, requesting response"
        );
        let mut unclaimed = self.failing.pods();

        for strategy in &self.strategies {
            let (can_fix, rest) = strategy.filter(unclaimed);
            unclaimed = rest;
            if can_fix.is_empty() {
                continue;
            }

            let demand = needed_resources(&can_fix);
            info!(
                cpu = demand.cpu,
                mem_mb = demand.mem_mb,
                pods = can_fix.len(),
                "missing resources"
            );
            match strategy.remediate(demand).await {
                Ok(()) => info!("remediation request successful"),
                Err(unmet) => error!(
                    error = %unmet.error,
                    residual = %unmet.residual,
                    "remediation failed"
                ),
            }
        }

        if !unclaimed.is_empty() {
            warn!(pods = unclaimed.len(), "unable to find strategy for pods");
        }

        self.failing.increment_remediations();
    }

    /// Tick forever on the configured interval. The timer always sleeps
    /// first; pass `sync_now` to run one pass immediately.
    pub async fn run(self, sync_now: bool) {
        if sync_now {
            self.tick().await;
        }
        loop {
            tokio::time::sleep(self.interval).await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::predicate::{NamespacePredicate, PodPredicate};
    use crate::remediator::{RemediateResult, Remediator, Unmet};
    use crate::resources::Resources;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateWaiting, ContainerStatus, PodSpec, PodStatus,
        ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCache {
        pods: Mutex<Vec<Arc<Pod>>>,
    }

    impl FakeCache {
        fn set(&self, pods: Vec<Arc<Pod>>) {
            *self.pods.lock().unwrap() = pods;
        }
    }

    impl PodCache for Arc<FakeCache> {
        fn pods(&self) -> Vec<Arc<Pod>> {
            self.pods.lock().unwrap().clone()
        }
    }

    struct PodBuilder {
        pod: Pod,
    }

    impl PodBuilder {
        fn new(namespace: &str, name: &str) -> Self {
            Self {
                pod: Pod {
                    metadata: ObjectMeta {
                        name: Some(name.into()),
                        namespace: Some(namespace.into()),
                        creation_timestamp: Some(Time(Utc::now() - chrono::Duration::hours(1))),
                        ..Default::default()
                    },
                    status: Some(PodStatus {
                        phase: Some("Pending".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            }
        }

        fn phase(mut self, phase: &str) -> Self {
            self.pod.status.as_mut().unwrap().phase = Some(phase.into());
            self
        }

        fn age_minutes(mut self, minutes: i64) -> Self {
            self.pod.metadata.creation_timestamp =
                Some(Time(Utc::now() - chrono::Duration::minutes(minutes)));
            self
        }

        fn container_creating(mut self) -> Self {
            self.pod.status.as_mut().unwrap().container_statuses = Some(vec![ContainerStatus {
                name: "c".into(),
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("ContainerCreating".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
            self
        }

        fn requests(mut self, cpu: &str, memory: &str) -> Self {
            self.pod.spec = Some(PodSpec {
                containers: vec![Container {
                    name: "c".into(),
                    resources: Some(ResourceRequirements {
                        requests: Some(
                            [
                                ("cpu".to_string(), Quantity(cpu.to_string())),
                                ("memory".to_string(), Quantity(memory.to_string())),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            });
            self
        }

        fn build(self) -> Arc<Pod> {
            Arc::new(self.pod)
        }
    }

    struct RecordingRemediator {
        demands: Arc<Mutex<Vec<Resources>>>,
        succeed: bool,
    }

    #[async_trait]
    impl Remediator for RecordingRemediator {
        fn name(&self) -> &str {
            "recording"
        }

        async fn remediate(&self, need: &Resources) -> RemediateResult {
            self.demands.lock().unwrap().push(*need);
            if self.succeed {
                Ok(Resources::EMPTY)
            } else {
                Err(Unmet {
                    residual: *need,
                    error: Error::cloud("recording failure"),
                })
            }
        }
    }

    fn recording_strategy(
        namespaces: Option<&[&str]>,
        succeed: bool,
    ) -> (Strategy, Arc<Mutex<Vec<Resources>>>) {
        let demands = Arc::new(Mutex::new(Vec::new()));
        let predicates = match namespaces {
            Some(list) => vec![PodPredicate::Namespace(NamespacePredicate::new(
                list.iter().copied(),
            ))],
            None => Vec::new(),
        };
        let strategy = Strategy::new(
            predicates,
            vec![Box::new(RecordingRemediator {
                demands: demands.clone(),
                succeed,
            }) as Box<dyn Remediator>],
        )
        .unwrap();
        (strategy, demands)
    }

    fn controller(
        cache: Arc<FakeCache>,
        strategies: Vec<Strategy>,
    ) -> (Controller<Arc<FakeCache>>, Arc<FailingPods>) {
        let failing = Arc::new(FailingPods::new());
        let controller = Controller::new(
            cache,
            failing.clone(),
            strategies,
            Duration::from_secs(5 * 60),
        );
        (controller, failing)
    }

    // =========================================================================
    // is_pod_fine
    // =========================================================================

    #[test]
    fn non_pending_pods_are_fine() {
        let pod = PodBuilder::new("a", "p").phase("Running").build();
        assert!(is_pod_fine(&pod));
    }

    #[test]
    fn pending_pods_are_not_fine() {
        let pod = PodBuilder::new("a", "p").build();
        assert!(!is_pod_fine(&pod));
    }

    #[test]
    fn pending_but_creating_containers_is_fine() {
        let pod = PodBuilder::new("a", "p").container_creating().build();
        assert!(is_pod_fine(&pod));
    }

    // =========================================================================
    // reconcile
    // =========================================================================

    #[test]
    fn reconcile_adds_old_pending_pods() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("a", "stuck").age_minutes(10).build()]);
        let (controller, failing) = controller(cache, Vec::new());

        controller.reconcile();
        assert!(failing.contains("a/stuck"));
    }

    #[test]
    fn reconcile_skips_young_pods() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("a", "fresh").age_minutes(1).build()]);
        let (controller, failing) = controller(cache, Vec::new());

        controller.reconcile();
        assert!(failing.is_empty());
    }

    #[test]
    fn reconcile_skips_pods_pulling_images() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("a", "creating")
            .age_minutes(10)
            .container_creating()
            .build()]);
        let (controller, failing) = controller(cache, Vec::new());

        controller.reconcile();
        assert!(failing.is_empty());
    }

    #[test]
    fn reconcile_drops_pods_that_became_healthy() {
        let cache = Arc::new(FakeCache::default());
        let (controller, failing) = controller(cache.clone(), Vec::new());

        failing.add(
            "a/p",
            PodBuilder::new("a", "p").age_minutes(10).build(),
        );
        cache.set(vec![PodBuilder::new("a", "p").phase("Running").build()]);

        controller.reconcile();
        assert!(failing.is_empty());
    }

    #[test]
    fn reconcile_drops_pods_missing_from_the_cache() {
        let cache = Arc::new(FakeCache::default());
        let (controller, failing) = controller(cache, Vec::new());

        failing.add("a/gone", PodBuilder::new("a", "gone").build());
        controller.reconcile();
        assert!(failing.is_empty());
    }

    #[test]
    fn reconcile_keeps_still_stuck_pods() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("a", "stuck").age_minutes(10).build()]);
        let (controller, failing) = controller(cache, Vec::new());

        controller.reconcile();
        controller.reconcile();
        assert!(failing.contains("a/stuck"));
        assert_eq!(failing.len(), 1);
    }

    #[test]
    fn pods_without_creation_timestamp_are_never_stuck() {
        let cache = Arc::new(FakeCache::default());
        let mut pod = PodBuilder::new("a", "no-ts").build();
        Arc::get_mut(&mut pod).unwrap().metadata.creation_timestamp = None;
        cache.set(vec![pod]);
        let (controller, failing) = controller(cache, Vec::new());

        controller.reconcile();
        assert!(failing.is_empty());
    }

    // =========================================================================
    // tick
    // =========================================================================

    #[tokio::test]
    async fn tick_without_failing_pods_calls_no_strategy() {
        let cache = Arc::new(FakeCache::default());
        let (strategy, demands) = recording_strategy(None, true);
        let (controller, _failing) = controller(cache, vec![strategy]);

        controller.tick().await;
        assert!(demands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_routes_demand_to_the_first_matching_strategy() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![
            PodBuilder::new("team-a", "p1")
                .age_minutes(10)
                .requests("500m", "512Mi")
                .build(),
            PodBuilder::new("team-b", "p2")
                .age_minutes(10)
                .requests("1", "1Gi")
                .build(),
        ]);

        let (for_a, demands_a) = recording_strategy(Some(&["team-a"]), true);
        let (catch_all, demands_rest) = recording_strategy(None, true);
        let (controller, _failing) = controller(cache, vec![for_a, catch_all]);

        controller.tick().await;

        let seen_a = demands_a.lock().unwrap();
        assert_eq!(seen_a.as_slice(), &[Resources::new(500, 512)]);
        let seen_rest = demands_rest.lock().unwrap();
        assert_eq!(seen_rest.as_slice(), &[Resources::new(1000, 1024)]);
    }

    #[tokio::test]
    async fn earlier_strategies_consume_their_pods() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("team-a", "p1")
            .age_minutes(10)
            .requests("500m", "512Mi")
            .build()]);

        let (first, demands_first) = recording_strategy(Some(&["team-a"]), false);
        let (second, demands_second) = recording_strategy(Some(&["team-a"]), true);
        let (controller, _failing) = controller(cache, vec![first, second]);

        controller.tick().await;

        // The pod matched the first strategy even though it failed; the
        // second strategy never saw it.
        assert_eq!(demands_first.lock().unwrap().len(), 1);
        assert!(demands_second.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_increments_remediation_counters() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("a", "stuck").age_minutes(10).build()]);
        let (strategy, _demands) = recording_strategy(None, false);
        let (controller, failing) = controller(cache, vec![strategy]);

        controller.tick().await;
        assert_eq!(failing.remediations("a/stuck"), Some(1));
        controller.tick().await;
        assert_eq!(failing.remediations("a/stuck"), Some(2));
    }

    #[tokio::test]
    async fn unmatched_pods_are_left_for_the_next_tick() {
        let cache = Arc::new(FakeCache::default());
        cache.set(vec![PodBuilder::new("unclaimed", "p")
            .age_minutes(10)
            .requests("500m", "512Mi")
            .build()]);
        let (strategy, demands) = recording_strategy(Some(&["other"]), true);
        let (controller, failing) = controller(cache, vec![strategy]);

        controller.tick().await;
        assert!(demands.lock().unwrap().is_empty());
        assert!(failing.contains("unclaimed/p"));
    }
}
