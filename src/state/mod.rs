//! Deployment state tracking for Netforge.
//!
//! A provisioning run produces a [`DeploymentState`]: the ordered, durable
//! record of every resource it created, in creation order (which is also
//! dependency order). The state document is the single source of truth
//! for teardown and for idempotent re-runs, and doubles as the audit
//! artifact a failed run leaves behind.
//!
//! The state is an owned value passed by reference through the
//! orchestrator and the teardown engine; nothing here is ambient or
//! static. Persistence lives behind the [`StatePersistence`] trait in
//! [`persistence`], with JSON-file and in-memory backends.

pub mod dependencies;
pub mod persistence;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dependencies::ResourceGraph;
pub use persistence::{JsonStateStore, MemoryStateStore, StatePersistence};

/// Errors that can occur during state persistence operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// No state document exists for the topology.
    #[error("No deployment state found for topology '{0}'")]
    NotFound(String),

    /// The state document could not be (de)serialized.
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying IO failure.
    #[error("State IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The atomic replace of the state file failed.
    #[error("State persist error: {0}")]
    Persist(String),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// The kind of a provisioned cloud resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    InternetGateway,
    NatGateway,
    RouteTable,
    RouteTableAssociation,
    SecurityGroup,
    NetworkAcl,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::NatGateway => "nat_gateway",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::RouteTableAssociation => "route_table_association",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::NetworkAcl => "network_acl",
        };
        write!(f, "{}", name)
    }
}

/// Record of one successfully created resource.
///
/// Created exactly once per successful provisioner call. Never mutated
/// afterwards except to mark it deleted during teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// User-assigned logical name, stable across runs.
    pub logical_name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Identifier assigned by the remote system.
    pub remote_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Logical names of resources this one depends on.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Set when teardown removed (or confirmed absent) this resource.
    #[serde(default)]
    pub deleted: bool,
}

impl ProvisionedResource {
    /// Create a record for a freshly provisioned resource.
    pub fn new(
        logical_name: impl Into<String>,
        kind: ResourceKind,
        remote_id: impl Into<String>,
        depends_on: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            kind,
            remote_id: remote_id.into(),
            created_at: Utc::now(),
            depends_on: depends_on.into_iter().collect(),
            deleted: false,
        }
    }
}

/// Overall status of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// A run is appending to this state right now.
    InProgress,
    /// Every step succeeded.
    Complete,
    /// A step failed (or the run was cancelled); the error is recorded.
    Failed,
    /// Teardown removed (or confirmed absent) every resource.
    TornDown,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::InProgress => write!(f, "in_progress"),
            DeploymentStatus::Complete => write!(f, "complete"),
            DeploymentStatus::Failed => write!(f, "failed"),
            DeploymentStatus::TornDown => write!(f, "torn_down"),
        }
    }
}

/// Ordered, durable record of one provisioning run.
///
/// Resources appear in creation order; reversing the sequence yields a
/// safe deletion order because creation never references a resource that
/// does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Topology name this state belongs to; the run exclusivity key.
    pub topology: String,
    /// Region the resources live in.
    pub region: String,
    /// Overall run status.
    pub status: DeploymentStatus,
    /// Resources in creation order.
    #[serde(default)]
    pub resources: Vec<ProvisionedResource>,
    /// The error that halted the run, when status is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Cancellation marker: the run was stopped between steps.
    #[serde(default)]
    pub cancelled: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentState {
    /// Create an empty in-progress state for a new run.
    pub fn new(topology: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            topology: topology.into(),
            region: region.into(),
            status: DeploymentStatus::InProgress,
            resources: Vec::new(),
            error: None,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append a freshly created resource.
    pub fn record(&mut self, resource: ProvisionedResource) {
        self.resources.push(resource);
    }

    /// Look up a resource by logical name.
    pub fn lookup(&self, logical_name: &str) -> Option<&ProvisionedResource> {
        self.resources
            .iter()
            .find(|r| r.logical_name == logical_name)
    }

    /// The remote identifier of a recorded resource.
    pub fn remote_id(&self, logical_name: &str) -> Option<&str> {
        self.lookup(logical_name).map(|r| r.remote_id.as_str())
    }

    /// Whether a run is currently appending to this state.
    pub fn is_active(&self) -> bool {
        self.status == DeploymentStatus::InProgress
    }

    /// Resources not yet removed, in reverse creation order - the safe
    /// deletion order.
    pub fn live_resources_reversed(&self) -> impl Iterator<Item = &ProvisionedResource> {
        self.resources.iter().rev().filter(|r| !r.deleted)
    }

    /// Number of resources not yet removed.
    pub fn live_count(&self) -> usize {
        self.resources.iter().filter(|r| !r.deleted).count()
    }

    /// Mark a resource removed (or confirmed absent) during teardown.
    pub fn mark_deleted(&mut self, logical_name: &str) {
        if let Some(resource) = self
            .resources
            .iter_mut()
            .find(|r| r.logical_name == logical_name)
        {
            resource.deleted = true;
        }
    }

    /// Mark the run complete.
    pub fn mark_complete(&mut self) {
        self.status = DeploymentStatus::Complete;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run failed with the triggering error.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeploymentStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run cancelled between steps. Leaves the state safe for a
    /// subsequent teardown.
    pub fn mark_cancelled(&mut self) {
        self.status = DeploymentStatus::Failed;
        self.cancelled = true;
        self.error = Some("run cancelled".into());
        self.finished_at = Some(Utc::now());
    }

    /// Mark teardown complete: every resource removed or confirmed absent.
    pub fn mark_torn_down(&mut self) {
        self.status = DeploymentStatus::TornDown;
        self.finished_at = Some(Utc::now());
    }
}
