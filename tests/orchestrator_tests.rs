//! End-to-end orchestration tests against the mock provider.
//!
//! These cover the run-level contracts: creation order, fail-fast on
//! conflicts and permission errors, bounded transient retry with
//! describe-before-reissue, run exclusivity, cancellation, and the
//! persistence guarantee that a halted run leaves a diagnosable state
//! document behind.

use std::sync::Arc;
use std::time::Duration;

use netforge::error::Error;
use netforge::orchestrator::Orchestrator;
use netforge::provider::{MockProvider, NetworkProvider, ProvisionError, ResourceRequest};
use netforge::provisioner::Provisioner;
use netforge::retry::RetryPolicy;
use netforge::state::{
    DeploymentState, DeploymentStatus, MemoryStateStore, ResourceGraph, ResourceKind,
    StatePersistence,
};
use netforge::topology::NetworkTopology;
use pretty_assertions::assert_eq;

fn public_only_topology() -> NetworkTopology {
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

fn three_subnet_topology() -> NetworkTopology {
    NetworkTopology::from_yaml(
        r#"
vpc_name: test-net
cidr: 10.0.0.0/16
region: us-east-1
subnets:
  - name: public-1
    cidr: 10.0.1.0/24
    type: public
    az: us-east-1a
  - name: public-2
    cidr: 10.0.2.0/24
    type: public
    az: us-east-1b
  - name: public-3
    cidr: 10.0.3.0/24
    type: public
    az: us-east-1c
"#,
    )
    .unwrap()
}

fn two_tier_nat_topology() -> NetworkTopology {
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
  - name: app-1a
    cidr: 10.0.10.0/24
    type: private
    az: us-east-1a
nat_gateway:
  enabled: true
"#,
    )
    .unwrap()
}

fn orchestrator(
    provider: &Arc<MockProvider>,
    store: &Arc<MemoryStateStore>,
) -> Orchestrator {
    Orchestrator::new(Provisioner::new(provider.clone()), store.clone())
        .with_retry_policy(RetryPolicy::constant(2, Duration::from_millis(1)))
}

#[tokio::test]
async fn public_only_run_creates_the_documented_sequence() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let state = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap();

    assert_eq!(state.status, DeploymentStatus::Complete);

    let kinds: Vec<ResourceKind> = state.resources.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResourceKind::Vpc,
            ResourceKind::InternetGateway,
            ResourceKind::RouteTable,
            ResourceKind::Subnet,
            ResourceKind::RouteTableAssociation,
            ResourceKind::SecurityGroup,
        ]
    );
    assert!(!state
        .resources
        .iter()
        .any(|r| r.kind == ResourceKind::NatGateway));

    // The remote side saw the same order.
    assert_eq!(
        provider.creation_log(),
        vec![
            "test-net",
            "test-net-igw",
            "test-net-public-rt",
            "public-1a",
            "public-1a-rta",
            "test-net-default",
        ]
    );
}

#[tokio::test]
async fn nat_run_places_gateway_after_its_host_subnet() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let state = orchestrator(&provider, &store)
        .apply(&two_tier_nat_topology())
        .await
        .unwrap();

    assert_eq!(state.status, DeploymentStatus::Complete);

    let names: Vec<&str> = state
        .resources
        .iter()
        .map(|r| r.logical_name.as_str())
        .collect();
    let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(pos("test-net-nat") > pos("public-1a"));
    assert!(pos("test-net-nat") > pos("test-net-private-rt"));

    let nat = state.lookup("test-net-nat").unwrap();
    assert!(nat.depends_on.contains("public-1a"));
    assert!(nat.depends_on.contains("test-net-private-rt"));
}

#[tokio::test]
async fn creation_order_reversed_is_a_safe_deletion_order() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let state = orchestrator(&provider, &store)
        .apply(&two_tier_nat_topology())
        .await
        .unwrap();

    let mut graph = ResourceGraph::new();
    for resource in &state.resources {
        graph
            .add_resource(&resource.logical_name, resource.depends_on.iter())
            .unwrap();
    }
    let creation_order: Vec<String> = state
        .resources
        .iter()
        .map(|r| r.logical_name.clone())
        .collect();
    assert!(graph.respects_order(&creation_order));
}

#[tokio::test]
async fn conflict_on_third_subnet_halts_with_ancestors_recorded() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());
    provider.fail_next_create(
        "public-3",
        ProvisionError::Conflict("the CIDR conflicts with another subnet".into()),
    );

    let error = orchestrator(&provider, &store)
        .apply(&three_subnet_topology())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Provision { .. }));

    let state = store.load("test-net").unwrap();
    assert_eq!(state.status, DeploymentStatus::Failed);
    assert!(state.error.as_deref().unwrap().contains("public-3"));

    // Exactly the first two subnets plus their ancestors.
    let names: Vec<&str> = state
        .resources
        .iter()
        .map(|r| r.logical_name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["test-net", "test-net-igw", "test-net-public-rt", "public-1", "public-2"]
    );
}

#[tokio::test]
async fn permission_failure_halts_without_retry() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());
    provider.fail_next_create(
        "test-net",
        ProvisionError::Permission("UnauthorizedOperation".into()),
    );

    let error = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap_err();
    assert_eq!(error.exit_code(), 3);

    // One attempt, no retries, nothing created.
    assert_eq!(provider.create_calls(), 1);
    assert_eq!(provider.resource_count(), 0);

    let state = store.load("test-net").unwrap();
    assert_eq!(state.status, DeploymentStatus::Failed);
    assert!(state.resources.is_empty());
}

#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());
    provider.fail_next_create("test-net", ProvisionError::Transient("timed out".into()));

    let state = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap();

    assert_eq!(state.status, DeploymentStatus::Complete);
    // The failed attempt did not land remotely, so the retry re-issued
    // the create after describing found nothing.
    assert!(provider.describe_calls() >= 1);
    assert_eq!(
        state
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Vpc)
            .count(),
        1
    );
}

#[tokio::test]
async fn transient_retry_adopts_a_create_that_landed() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    // Simulate a create whose response was lost: the resource exists
    // remotely, and the next create attempt reports a transient failure.
    let existing_id = provider
        .create(&ResourceRequest::Vpc {
            name: "test-net".into(),
            cidr: "10.0.0.0/16".into(),
            enable_dns_hostnames: true,
            enable_dns_support: true,
            tags: vec![],
        })
        .await
        .unwrap();
    provider.fail_next_create("test-net", ProvisionError::Transient("socket closed".into()));

    let state = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap();

    // Adopted, not duplicated.
    assert_eq!(state.remote_id("test-net"), Some(existing_id.as_str()));
    assert_eq!(
        state
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Vpc)
            .count(),
        1
    );
}

#[tokio::test]
async fn exhausted_transient_retries_fail_the_run() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());
    for _ in 0..5 {
        provider.fail_next_create("test-net", ProvisionError::Transient("throttled".into()));
    }

    let error = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Provision { .. }));

    // Initial attempt plus two retries under a max_retries=2 policy.
    assert_eq!(provider.create_calls(), 3);

    let state = store.load("test-net").unwrap();
    assert_eq!(state.status, DeploymentStatus::Failed);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn in_progress_state_blocks_a_second_run() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());
    store
        .save(&DeploymentState::new("test-net", "us-east-1"))
        .unwrap();

    let error = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::RunAlreadyActive(name) if name == "test-net"));
    assert_eq!(provider.create_calls(), 0);
}

#[tokio::test]
async fn completed_state_does_not_block_a_rerun() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let mut previous = DeploymentState::new("test-net", "us-east-1");
    previous.mark_complete();
    store.save(&previous).unwrap();

    // The rerun starts; it then conflicts remotely only if the
    // resources still exist, which they do not here.
    let state = orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap();
    assert_eq!(state.status, DeploymentStatus::Complete);
}

#[tokio::test]
async fn cancellation_between_steps_marks_the_state() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let orchestrator = orchestrator(&provider, &store);
    orchestrator.cancellation_token().cancel();

    let error = orchestrator
        .apply(&public_only_topology())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Cancelled(_)));
    assert_eq!(provider.create_calls(), 0);

    let state = store.load("test-net").unwrap();
    assert_eq!(state.status, DeploymentStatus::Failed);
    assert!(state.cancelled);
    assert!(state.error.as_deref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn invalid_topology_never_starts_a_run() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let mut topology = public_only_topology();
    topology.subnets[0].cidr = "192.168.0.0/24".into();

    let error = orchestrator(&provider, &store)
        .apply(&topology)
        .await
        .unwrap_err();
    assert_eq!(error.exit_code(), 2);
    assert_eq!(provider.create_calls(), 0);
    assert!(!store.exists("test-net"));
}

#[tokio::test]
async fn state_is_persisted_after_every_step() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    // Fail the final step: everything before it must already be durable.
    provider.fail_next_create(
        "test-net-default",
        ProvisionError::Conflict("duplicate group".into()),
    );

    orchestrator(&provider, &store)
        .apply(&public_only_topology())
        .await
        .unwrap_err();

    let state = store.load("test-net").unwrap();
    assert_eq!(state.resources.len(), 5);
    assert_eq!(state.status, DeploymentStatus::Failed);
}
