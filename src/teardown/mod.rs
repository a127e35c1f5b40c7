//! Teardown engine.
//!
//! Replays a deployment state in strict reverse creation order, deleting
//! dependents before their dependencies. Unlike creation, teardown does
//! not fail fast: a resource that cannot be removed (a `Conflict` from a
//! dependent created out-of-band, say) is recorded and the engine keeps
//! going, because partial teardown still makes forward progress toward a
//! clean state. A remote `NotFound` counts as removed - resources
//! deleted out-of-band or by a previous partial teardown never fail a
//! re-run.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::provider::ProvisionError;
use crate::provisioner::{DeleteOutcome, Provisioner};
use crate::retry::RetryPolicy;
use crate::state::{DeploymentState, ProvisionedResource, ResourceGraph, StatePersistence};

/// Summary of one teardown run.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Resources the remote system removed.
    pub removed: Vec<String>,
    /// Resources already absent remotely, counted as removed.
    pub already_absent: Vec<String>,
    /// Resources that could not be removed, with the classified error.
    /// These need operator intervention.
    pub failed: Vec<(String, ProvisionError)>,
}

impl TeardownReport {
    /// Whether every attempted resource was removed or confirmed absent.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of resources left behind.
    pub fn unremoved(&self) -> usize {
        self.failed.len()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} removed, {} already absent, {} failed",
            self.removed.len(),
            self.already_absent.len(),
            self.failed.len()
        )
    }
}

/// Replays deployment state in reverse, deleting resources.
pub struct TeardownEngine {
    provisioner: Provisioner,
    store: Arc<dyn StatePersistence>,
    retry: RetryPolicy,
}

impl TeardownEngine {
    /// Create an engine with the default retry policy.
    pub fn new(provisioner: Provisioner, store: Arc<dyn StatePersistence>) -> Self {
        Self {
            provisioner,
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Tear down every live resource in the state, in reverse creation
    /// order. The state is persisted after each removal, and rewritten
    /// to `torn_down` once nothing is left; a partial failure leaves the
    /// status untouched so the run can be repeated after intervention.
    pub async fn teardown(&self, state: &mut DeploymentState) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();

        let targets: Vec<ProvisionedResource> =
            state.live_resources_reversed().cloned().collect();
        info!(topology = %state.topology, resources = targets.len(), "teardown started");

        // Recorded dependency graph, used to tell a conflict caused by a
        // recorded dependent from one caused by an out-of-band resource.
        let mut graph = ResourceGraph::new();
        for resource in &state.resources {
            let _ = graph.add_resource(&resource.logical_name, resource.depends_on.iter());
        }

        for resource in &targets {
            match self.delete_with_retry(resource).await {
                Ok(DeleteOutcome::Deleted) => {
                    info!(name = %resource.logical_name, id = %resource.remote_id, "resource removed");
                    report.removed.push(resource.logical_name.clone());
                    state.mark_deleted(&resource.logical_name);
                    self.store.save(state)?;
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    info!(name = %resource.logical_name, id = %resource.remote_id, "resource already absent");
                    report.already_absent.push(resource.logical_name.clone());
                    state.mark_deleted(&resource.logical_name);
                    self.store.save(state)?;
                }
                Err(error) => {
                    let recorded_dependents: Vec<String> = graph
                        .dependents_of(&resource.logical_name)
                        .into_iter()
                        .filter(|d| state.lookup(d).map(|r| !r.deleted).unwrap_or(false))
                        .collect();
                    if recorded_dependents.is_empty() {
                        warn!(name = %resource.logical_name, %error, "resource could not be removed (no recorded dependents remain), continuing");
                    } else {
                        warn!(name = %resource.logical_name, %error, dependents = ?recorded_dependents, "resource could not be removed, continuing");
                    }
                    report
                        .failed
                        .push((resource.logical_name.clone(), error));
                }
            }
        }

        if report.is_clean() && state.live_count() == 0 {
            state.mark_torn_down();
            self.store.save(state)?;
            info!(topology = %state.topology, "teardown complete");
        } else {
            warn!(topology = %state.topology, unremoved = report.unremoved(), "teardown incomplete");
        }

        Ok(report)
    }

    async fn delete_with_retry(
        &self,
        resource: &ProvisionedResource,
    ) -> std::result::Result<DeleteOutcome, ProvisionError> {
        let mut attempt = 0;
        loop {
            match self.provisioner.delete(resource).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.is_transient() && self.retry.should_continue(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(name = %resource.logical_name, %error, ?delay, "transient delete failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Convert a report into the CLI-facing result: a partial teardown is an
/// error with a distinct exit status, never silently swallowed.
pub fn report_to_result(report: &TeardownReport) -> Result<()> {
    if report.is_clean() {
        Ok(())
    } else {
        Err(Error::TeardownIncomplete {
            unremoved: report.unremoved(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Orchestrator;
    use crate::provider::{MockProvider, NetworkProvider, ResourceRequest};
    use crate::state::{DeploymentStatus, MemoryStateStore};
    use crate::topology::NetworkTopology;
    use std::time::Duration;

    fn topology() -> NetworkTopology {
        NetworkTopology::from_yaml(
            r#"
vpc_name: test-net
cidr: 10.0.0.0/16
region: us-east-1
subnets:
  - name: public-1a
    cidr: 10.0.1.0/24
    type: public
    az: us-east-1a
"#,
        )
        .unwrap()
    }

    async fn provisioned(
        provider: &Arc<MockProvider>,
        store: &Arc<MemoryStateStore>,
    ) -> DeploymentState {
        let provisioner = Provisioner::new(provider.clone());
        let orchestrator = Orchestrator::new(provisioner, store.clone());
        orchestrator.apply(&topology()).await.unwrap()
    }

    fn engine(provider: &Arc<MockProvider>, store: &Arc<MemoryStateStore>) -> TeardownEngine {
        TeardownEngine::new(Provisioner::new(provider.clone()), store.clone())
            .with_retry_policy(RetryPolicy::constant(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn teardown_removes_everything_in_reverse_order() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let mut state = provisioned(&provider, &store).await;

        let report = engine(&provider, &store)
            .teardown(&mut state)
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 6);
        assert_eq!(state.status, DeploymentStatus::TornDown);
        assert_eq!(provider.resource_count(), 0);

        // Dependents were removed before their dependencies.
        let vpc_position = report.removed.iter().position(|n| n == "test-net").unwrap();
        assert_eq!(vpc_position, report.removed.len() - 1);
    }

    #[tokio::test]
    async fn already_absent_resources_count_as_removed() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let mut state = provisioned(&provider, &store).await;

        // One resource disappears out-of-band.
        let subnet_id = state.remote_id("public-1a").unwrap().to_string();
        provider.forget(&subnet_id);

        let report = engine(&provider, &store)
            .teardown(&mut state)
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.already_absent, vec!["public-1a"]);
        assert_eq!(state.status, DeploymentStatus::TornDown);
    }

    #[tokio::test]
    async fn teardown_twice_with_original_state_is_idempotent() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let state = provisioned(&provider, &store).await;

        let mut first_pass = state.clone();
        engine(&provider, &store)
            .teardown(&mut first_pass)
            .await
            .unwrap();

        // Re-run with the original (pre-teardown) document: every delete
        // reports the resource already absent and the run still succeeds.
        let mut second_pass = state;
        let report = engine(&provider, &store)
            .teardown(&mut second_pass)
            .await
            .unwrap();

        assert!(report.is_clean());
        assert!(report.removed.is_empty());
        assert_eq!(report.already_absent.len(), 6);
        assert_eq!(second_pass.status, DeploymentStatus::TornDown);
    }

    #[tokio::test]
    async fn conflict_is_recorded_but_does_not_halt() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let mut state = provisioned(&provider, &store).await;

        // An out-of-band subnet keeps the VPC occupied.
        let vpc_id = state.remote_id("test-net").unwrap().to_string();
        provider
            .create(&ResourceRequest::Subnet {
                name: "rogue".into(),
                vpc_id: vpc_id.clone(),
                cidr: "10.0.99.0/24".into(),
                availability_zone: "us-east-1a".into(),
                map_public_ip: false,
                tier: "private".into(),
            })
            .await
            .unwrap();

        let report = engine(&provider, &store)
            .teardown(&mut state)
            .await
            .unwrap();

        assert_eq!(report.unremoved(), 1);
        assert_eq!(report.failed[0].0, "test-net");
        assert!(matches!(report.failed[0].1, ProvisionError::Conflict(_)));
        // Everything except the VPC is gone.
        assert_eq!(report.removed.len(), 5);
        assert_ne!(state.status, DeploymentStatus::TornDown);
        assert!(report_to_result(&report).is_err());
    }

    #[tokio::test]
    async fn second_run_retries_only_the_leftovers() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let mut state = provisioned(&provider, &store).await;

        let vpc_id = state.remote_id("test-net").unwrap().to_string();
        provider
            .create(&ResourceRequest::Subnet {
                name: "rogue".into(),
                vpc_id: vpc_id.clone(),
                cidr: "10.0.99.0/24".into(),
                availability_zone: "us-east-1a".into(),
                map_public_ip: false,
                tier: "private".into(),
            })
            .await
            .unwrap();

        let first = engine(&provider, &store)
            .teardown(&mut state)
            .await
            .unwrap();
        assert_eq!(first.unremoved(), 1);

        // Operator removes the blocker, then re-runs.
        let rogue_id = provider
            .describe(crate::state::ResourceKind::Subnet, "rogue")
            .await
            .unwrap()
            .unwrap();
        provider.forget(&rogue_id);

        let second = engine(&provider, &store)
            .teardown(&mut state)
            .await
            .unwrap();
        assert!(second.is_clean());
        assert_eq!(second.removed, vec!["test-net"]);
        assert_eq!(state.status, DeploymentStatus::TornDown);
    }

    #[tokio::test]
    async fn transient_delete_failures_are_retried() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let mut state = provisioned(&provider, &store).await;

        let subnet_id = state.remote_id("public-1a").unwrap().to_string();
        provider.fail_next_delete(&subnet_id, ProvisionError::Transient("throttled".into()));

        let report = engine(&provider, &store)
            .teardown(&mut state)
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(state.status, DeploymentStatus::TornDown);
    }
}
