//! Cloud provider boundary.
//!
//! The orchestration core talks to the cloud through the
//! [`NetworkProvider`] trait: one `create` per resource kind taking a
//! typed [`ResourceRequest`], a `describe` used to find resources by
//! logical name before re-issuing a create, and a `delete`. Two
//! implementations ship with the crate:
//!
//! - [`aws::AwsProvider`]: backed by the official AWS SDK, gated behind
//!   the `aws` cargo feature.
//! - [`mock::MockProvider`]: in-memory, used by the test suite and for
//!   local experimentation.
//!
//! A "composite" cloud flow (internet gateway create-and-attach, NAT
//! gateway with its Elastic IP and default route) is one provider
//! operation per resource kind, so the provisioner still issues exactly
//! one provider call per created resource.

#[cfg(feature = "aws")]
pub mod aws;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::state::ResourceKind;
use crate::topology::SecurityRule;

#[cfg(feature = "aws")]
pub use aws::AwsProvider;
pub use mock::MockProvider;

/// Classified failure returned by provider and provisioner operations.
///
/// The classification drives orchestration policy: `Transient` may be
/// retried with backoff, `Conflict` and `Permission` halt a creation
/// run, `NotFound` is success for deletes and an error everywhere else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// Network trouble, timeout or remote throttling. Retryable.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Duplicate name, CIDR overlap or a dependent resource still in
    /// place. Not retryable; signals a topology or prior-run defect.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Authorization failure. Fatal; the run must abort.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The remote system reports the resource absent. Success for
    /// delete, an error for any other operation.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request could not be built or understood, e.g. a dependency
    /// reference that resolved to nothing.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProvisionError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Transient(_))
    }

    /// Whether this failure must abort a creation run immediately.
    pub fn is_fatal_for_create(&self) -> bool {
        !self.is_transient()
    }

    /// Classify a raw error message by pattern. Providers that surface
    /// structured error codes should classify from those instead.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        const TRANSIENT: &[&str] = &[
            "timeout",
            "timed out",
            "throttl",
            "rate limit",
            "too many requests",
            "service unavailable",
            "temporarily unavailable",
            "connection refused",
            "connection reset",
            "internal error",
        ];
        const CONFLICT: &[&str] = &[
            "duplicate",
            "already exists",
            "conflict",
            "overlap",
            "dependencyviolation",
            "in use",
        ];
        const PERMISSION: &[&str] = &[
            "unauthorized",
            "access denied",
            "forbidden",
            "auth failure",
            "not authorized",
        ];
        const NOT_FOUND: &[&str] = &["not found", "notfound", "does not exist"];

        if TRANSIENT.iter().any(|p| lower.contains(p)) {
            ProvisionError::Transient(message)
        } else if PERMISSION.iter().any(|p| lower.contains(p)) {
            ProvisionError::Permission(message)
        } else if NOT_FOUND.iter().any(|p| lower.contains(p)) {
            ProvisionError::NotFound(message)
        } else if CONFLICT.iter().any(|p| lower.contains(p)) {
            ProvisionError::Conflict(message)
        } else {
            // Unclassifiable failures halt the run rather than loop.
            ProvisionError::Conflict(message)
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProvisionError>;

/// Target of a default route in a route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Route 0.0.0.0/0 through an internet gateway.
    InternetGateway(String),
    /// Route 0.0.0.0/0 through a NAT gateway.
    NatGateway(String),
}

/// Typed parameters for one resource creation call.
///
/// Every variant carries the remote identifiers of the resources it
/// depends on; the orchestrator resolves logical names to remote ids
/// from the deployment state before calling the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRequest {
    Vpc {
        name: String,
        cidr: String,
        enable_dns_hostnames: bool,
        enable_dns_support: bool,
        tags: Vec<(String, String)>,
    },
    Subnet {
        name: String,
        vpc_id: String,
        cidr: String,
        availability_zone: String,
        /// Public subnets get automatic public IPs on launch.
        map_public_ip: bool,
        /// Recorded as the `Type` tag.
        tier: String,
    },
    InternetGateway {
        name: String,
        vpc_id: String,
    },
    NatGateway {
        name: String,
        subnet_id: String,
        /// Route table to receive the outbound default route, when the
        /// topology has private subnets.
        route_table_id: Option<String>,
    },
    RouteTable {
        name: String,
        vpc_id: String,
        /// Default route installed at creation, e.g. to the internet
        /// gateway for the public table.
        default_route: Option<RouteTarget>,
    },
    RouteTableAssociation {
        name: String,
        subnet_id: String,
        route_table_id: String,
    },
    SecurityGroup {
        name: String,
        vpc_id: String,
        description: String,
        /// Ingress allow rules; empty means default-deny.
        ingress: Vec<SecurityRule>,
    },
    NetworkAcl {
        name: String,
        vpc_id: String,
    },
}

impl ResourceRequest {
    /// The resource kind this request creates.
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRequest::Vpc { .. } => ResourceKind::Vpc,
            ResourceRequest::Subnet { .. } => ResourceKind::Subnet,
            ResourceRequest::InternetGateway { .. } => ResourceKind::InternetGateway,
            ResourceRequest::NatGateway { .. } => ResourceKind::NatGateway,
            ResourceRequest::RouteTable { .. } => ResourceKind::RouteTable,
            ResourceRequest::RouteTableAssociation { .. } => ResourceKind::RouteTableAssociation,
            ResourceRequest::SecurityGroup { .. } => ResourceKind::SecurityGroup,
            ResourceRequest::NetworkAcl { .. } => ResourceKind::NetworkAcl,
        }
    }

    /// The logical name the created resource is tagged with.
    pub fn name(&self) -> &str {
        match self {
            ResourceRequest::Vpc { name, .. }
            | ResourceRequest::Subnet { name, .. }
            | ResourceRequest::InternetGateway { name, .. }
            | ResourceRequest::NatGateway { name, .. }
            | ResourceRequest::RouteTable { name, .. }
            | ResourceRequest::RouteTableAssociation { name, .. }
            | ResourceRequest::SecurityGroup { name, .. }
            | ResourceRequest::NetworkAcl { name, .. } => name,
        }
    }
}

/// The cloud API boundary.
///
/// Implementations translate typed requests into remote calls. Each
/// method is one state-changing operation; implementations hold no
/// per-run state. `describe` supports the idempotency contract: after a
/// transient failure the caller describes by logical name before
/// re-issuing the create, so a call that actually landed remotely is
/// adopted instead of duplicated.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// Create a resource, returning the identifier assigned remotely.
    async fn create(&self, request: &ResourceRequest) -> ProviderResult<String>;

    /// Find a resource of the given kind by its logical name. Returns
    /// the remote identifier when one exists.
    async fn describe(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> ProviderResult<Option<String>>;

    /// Delete a resource by remote identifier. Returns `NotFound` when
    /// the remote system reports it already absent.
    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<()>;
}
