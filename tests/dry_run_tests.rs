//! Dry-run contract: validation plus plan computation, with zero remote
//! calls and zero state writes.

use std::sync::Arc;

use netforge::orchestrator::plan;
use netforge::provider::MockProvider;
use netforge::state::{MemoryStateStore, ResourceKind};
use netforge::topology::NetworkTopology;
use pretty_assertions::assert_eq;

fn topology() -> NetworkTopology {
    NetworkTopology::from_yaml(
        r#"
vpc_name: plan-net
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

#[test]
fn dry_run_touches_neither_provider_nor_store() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryStateStore::new());

    let topology = topology();
    let report = topology.validate();
    assert!(report.is_valid());
    let execution_plan = plan(&topology).unwrap();

    assert!(!execution_plan.is_empty());
    assert_eq!(provider.create_calls(), 0);
    assert_eq!(provider.describe_calls(), 0);
    assert_eq!(provider.delete_calls(), 0);
    assert!(store.is_empty());
}

#[test]
fn plan_is_deterministic() {
    let topology = topology();
    let first = plan(&topology).unwrap();
    let second = plan(&topology).unwrap();
    assert_eq!(first.names(), second.names());
}

#[test]
fn plan_covers_every_declared_subnet_and_association() {
    let execution_plan = plan(&topology()).unwrap();

    let subnets: Vec<&str> = execution_plan
        .steps()
        .iter()
        .filter(|s| s.kind == ResourceKind::Subnet)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(subnets, vec!["public-1a", "app-1a"]);

    let associations: Vec<&str> = execution_plan
        .steps()
        .iter()
        .filter(|s| s.kind == ResourceKind::RouteTableAssociation)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(associations, vec!["public-1a-rta", "app-1a-rta"]);
}
