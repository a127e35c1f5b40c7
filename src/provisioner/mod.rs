//! Resource provisioner.
//!
//! The provisioner executes exactly one remote operation per invocation
//! and holds no state between calls. It does not retry: retry policy
//! belongs to the orchestrator. What it owns is the shape of a single
//! step - the caller-supplied call timeout (expiry is classified
//! `Transient`), the `NotFound`-is-success rule for deletes, and the
//! translation of a successful create into a [`ProvisionedResource`]
//! record.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::provider::{NetworkProvider, ProvisionError, ResourceRequest};
use crate::state::{ProvisionedResource, ResourceKind};

/// Default remote-call timeout. NAT gateways take minutes to settle, so
/// the window is generous.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The remote system removed the resource.
    Deleted,
    /// The remote system reported it already absent; success for
    /// teardown purposes.
    AlreadyAbsent,
}

/// Executes single creation and deletion steps against a provider.
#[derive(Clone)]
pub struct Provisioner {
    provider: Arc<dyn NetworkProvider>,
    call_timeout: Duration,
}

impl Provisioner {
    /// Wrap a provider with the default call timeout.
    pub fn new(provider: Arc<dyn NetworkProvider>) -> Self {
        Self {
            provider,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Issue exactly one remote creation call. On success returns the
    /// record carrying the remotely assigned identifier.
    pub async fn create(
        &self,
        request: &ResourceRequest,
        depends_on: impl IntoIterator<Item = String>,
    ) -> Result<ProvisionedResource, ProvisionError> {
        let name = request.name().to_string();
        debug!(kind = %request.kind(), %name, "issuing create");

        let remote_id = self.call(self.provider.create(request)).await?;
        Ok(ProvisionedResource::new(
            name,
            request.kind(),
            remote_id,
            depends_on,
        ))
    }

    /// Delete a previously provisioned resource. A remote `NotFound` is
    /// success: the resource was removed out-of-band or by a previous
    /// partial teardown.
    pub async fn delete(
        &self,
        resource: &ProvisionedResource,
    ) -> Result<DeleteOutcome, ProvisionError> {
        debug!(kind = %resource.kind, name = %resource.logical_name, id = %resource.remote_id, "issuing delete");

        match self
            .call(self.provider.delete(resource.kind, &resource.remote_id))
            .await
        {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(ProvisionError::NotFound(_)) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }

    /// Find a resource by logical name, used before re-issuing a create
    /// after a transient failure so a call that actually landed remotely
    /// is adopted instead of duplicated.
    pub async fn find_existing(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> Result<Option<String>, ProvisionError> {
        self.call(self.provider.describe(kind, logical_name)).await
    }

    /// Build the record for a resource found remotely rather than
    /// created by this run.
    pub fn adopt(
        &self,
        logical_name: impl Into<String>,
        kind: ResourceKind,
        remote_id: impl Into<String>,
        depends_on: impl IntoIterator<Item = String>,
    ) -> ProvisionedResource {
        ProvisionedResource::new(logical_name, kind, remote_id, depends_on)
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ProvisionError>>,
    ) -> Result<T, ProvisionError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProvisionError::Transient(format!(
                "remote call timed out after {:?}",
                self.call_timeout
            ))),
        }
    }
}
