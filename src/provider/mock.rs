//! In-memory mock provider.
//!
//! Behaves like a small model of the remote API: remote identifiers are
//! allocated per kind, duplicate logical names conflict, parents must
//! exist, and a resource with live dependents refuses deletion with a
//! dependency violation. Tests script failures per logical name to
//! exercise retry, halt and partial-teardown paths.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{NetworkProvider, ProviderResult, ProvisionError, ResourceRequest};
use crate::state::ResourceKind;

/// One resource held by the mock.
#[derive(Debug, Clone)]
pub struct MockResource {
    pub remote_id: String,
    pub logical_name: String,
    pub kind: ResourceKind,
    /// Remote ids this resource was created under (vpc, subnet, ...).
    pub parents: Vec<String>,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, MockResource>,
    counter: u64,
    creation_log: Vec<String>,
    create_failures: HashMap<String, VecDeque<ProvisionError>>,
    delete_failures: HashMap<String, VecDeque<ProvisionError>>,
    create_calls: u64,
    describe_calls: u64,
    delete_calls: u64,
}

/// In-memory [`NetworkProvider`] implementation.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<Inner>,
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Vpc => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::NatGateway => "nat",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::RouteTableAssociation => "rtbassoc",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::NetworkAcl => "acl",
    }
}

fn request_parents(request: &ResourceRequest) -> Vec<String> {
    match request {
        ResourceRequest::Vpc { .. } => Vec::new(),
        ResourceRequest::Subnet { vpc_id, .. }
        | ResourceRequest::InternetGateway { vpc_id, .. }
        | ResourceRequest::NetworkAcl { vpc_id, .. } => vec![vpc_id.clone()],
        ResourceRequest::SecurityGroup { vpc_id, .. } => vec![vpc_id.clone()],
        ResourceRequest::NatGateway {
            subnet_id,
            route_table_id,
            ..
        } => {
            let mut parents = vec![subnet_id.clone()];
            parents.extend(route_table_id.clone());
            parents
        }
        ResourceRequest::RouteTable {
            vpc_id,
            default_route,
            ..
        } => {
            let mut parents = vec![vpc_id.clone()];
            if let Some(target) = default_route {
                match target {
                    super::RouteTarget::InternetGateway(id)
                    | super::RouteTarget::NatGateway(id) => parents.push(id.clone()),
                }
            }
            parents
        }
        ResourceRequest::RouteTableAssociation {
            subnet_id,
            route_table_id,
            ..
        } => vec![subnet_id.clone(), route_table_id.clone()],
    }
}

impl MockProvider {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `create` for a logical name to fail. Repeated
    /// calls queue failures consumed in order.
    pub fn fail_next_create(&self, logical_name: &str, error: ProvisionError) {
        self.inner
            .lock()
            .create_failures
            .entry(logical_name.to_string())
            .or_default()
            .push_back(error);
    }

    /// Script the next `delete` for a remote id to fail.
    pub fn fail_next_delete(&self, remote_id: &str, error: ProvisionError) {
        self.inner
            .lock()
            .delete_failures
            .entry(remote_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Remove a resource without dependency checks, simulating an
    /// out-of-band deletion.
    pub fn forget(&self, remote_id: &str) {
        self.inner.lock().resources.remove(remote_id);
    }

    /// Whether a resource currently exists.
    pub fn contains(&self, remote_id: &str) -> bool {
        self.inner.lock().resources.contains_key(remote_id)
    }

    /// Number of live resources.
    pub fn resource_count(&self) -> usize {
        self.inner.lock().resources.len()
    }

    /// Logical names in creation order.
    pub fn creation_log(&self) -> Vec<String> {
        self.inner.lock().creation_log.clone()
    }

    /// Number of `create` calls observed, including failed ones.
    pub fn create_calls(&self) -> u64 {
        self.inner.lock().create_calls
    }

    /// Number of `describe` calls observed.
    pub fn describe_calls(&self) -> u64 {
        self.inner.lock().describe_calls
    }

    /// Number of `delete` calls observed, including failed ones.
    pub fn delete_calls(&self) -> u64 {
        self.inner.lock().delete_calls
    }
}

#[async_trait]
impl NetworkProvider for MockProvider {
    async fn create(&self, request: &ResourceRequest) -> ProviderResult<String> {
        let mut inner = self.inner.lock();
        inner.create_calls += 1;

        let name = request.name().to_string();
        if let Some(queue) = inner.create_failures.get_mut(&name) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        let kind = request.kind();
        if inner
            .resources
            .values()
            .any(|r| r.kind == kind && r.logical_name == name)
        {
            return Err(ProvisionError::Conflict(format!(
                "{} '{}' already exists",
                kind, name
            )));
        }

        for parent in request_parents(request) {
            if !inner.resources.contains_key(&parent) {
                return Err(ProvisionError::NotFound(format!(
                    "parent resource '{}' does not exist",
                    parent
                )));
            }
        }

        inner.counter += 1;
        let remote_id = format!("{}-{:08x}", id_prefix(kind), inner.counter);
        inner.resources.insert(
            remote_id.clone(),
            MockResource {
                remote_id: remote_id.clone(),
                logical_name: name.clone(),
                kind,
                parents: request_parents(request),
            },
        );
        inner.creation_log.push(name);
        Ok(remote_id)
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> ProviderResult<Option<String>> {
        let mut inner = self.inner.lock();
        inner.describe_calls += 1;
        Ok(inner
            .resources
            .values()
            .find(|r| r.kind == kind && r.logical_name == logical_name)
            .map(|r| r.remote_id.clone()))
    }

    async fn delete(&self, _kind: ResourceKind, remote_id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock();
        inner.delete_calls += 1;

        if let Some(queue) = inner.delete_failures.get_mut(remote_id) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        if !inner.resources.contains_key(remote_id) {
            return Err(ProvisionError::NotFound(format!(
                "resource '{}' does not exist",
                remote_id
            )));
        }

        let dependents: Vec<String> = inner
            .resources
            .values()
            .filter(|r| r.parents.iter().any(|p| p == remote_id))
            .map(|r| r.logical_name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(ProvisionError::Conflict(format!(
                "DependencyViolation: '{}' has dependents: {}",
                remote_id,
                dependents.join(", ")
            )));
        }

        inner.resources.remove(remote_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vpc_request() -> ResourceRequest {
        ResourceRequest::Vpc {
            name: "test-net".into(),
            cidr: "10.0.0.0/16".into(),
            enable_dns_hostnames: true,
            enable_dns_support: true,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn create_allocates_kind_prefixed_ids() {
        let provider = MockProvider::new();
        let vpc_id = provider.create(&vpc_request()).await.unwrap();
        assert!(vpc_id.starts_with("vpc-"));

        let igw_id = provider
            .create(&ResourceRequest::InternetGateway {
                name: "test-net-igw".into(),
                vpc_id: vpc_id.clone(),
            })
            .await
            .unwrap();
        assert!(igw_id.starts_with("igw-"));
        assert_eq!(provider.resource_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_logical_name_conflicts() {
        let provider = MockProvider::new();
        provider.create(&vpc_request()).await.unwrap();
        let error = provider.create(&vpc_request()).await.unwrap_err();
        assert!(matches!(error, ProvisionError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_parent_is_not_found() {
        let provider = MockProvider::new();
        let error = provider
            .create(&ResourceRequest::InternetGateway {
                name: "igw".into(),
                vpc_id: "vpc-00000000".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn describe_finds_by_logical_name() {
        let provider = MockProvider::new();
        let vpc_id = provider.create(&vpc_request()).await.unwrap();

        let found = provider
            .describe(ResourceKind::Vpc, "test-net")
            .await
            .unwrap();
        assert_eq!(found, Some(vpc_id));

        let missing = provider
            .describe(ResourceKind::Vpc, "other")
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn delete_with_dependents_is_a_conflict() {
        let provider = MockProvider::new();
        let vpc_id = provider.create(&vpc_request()).await.unwrap();
        provider
            .create(&ResourceRequest::Subnet {
                name: "public-1a".into(),
                vpc_id: vpc_id.clone(),
                cidr: "10.0.1.0/24".into(),
                availability_zone: "us-east-1a".into(),
                map_public_ip: true,
                tier: "public".into(),
            })
            .await
            .unwrap();

        let error = provider.delete(ResourceKind::Vpc, &vpc_id).await.unwrap_err();
        assert!(matches!(error, ProvisionError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let provider = MockProvider::new();
        let error = provider
            .delete(ResourceKind::Vpc, "vpc-deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(error, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let provider = MockProvider::new();
        provider.fail_next_create("test-net", ProvisionError::Transient("throttled".into()));

        let first = provider.create(&vpc_request()).await;
        assert!(matches!(first, Err(ProvisionError::Transient(_))));

        let second = provider.create(&vpc_request()).await;
        assert!(second.is_ok());
        assert_eq!(provider.create_calls(), 2);
    }
}
