//! # Netforge - Declarative AWS Network Provisioning
//!
//! Netforge turns a declarative description of a multi-tier AWS network
//! (VPC, subnets, gateways, route tables, security controls) into an
//! ordered sequence of cloud resource-creation operations, records every
//! identifier the remote system assigns, and can later replay that
//! record in reverse to tear everything down safely and idempotently.
//!
//! ## Core Concepts
//!
//! - **Topology**: the typed, validated model of the desired network
//! - **Execution Plan**: the ordered step list over the fixed resource
//!   dependency graph
//! - **Deployment State**: the durable, ordered record of created
//!   resources; audit artifact and teardown input
//! - **Provider**: the cloud API boundary, with an AWS SDK
//!   implementation (behind the `aws` feature) and an in-memory mock
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                 (apply | dry-run | teardown)                         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │  Topology Model │──▶│    Orchestrator     │──▶│   State Store       │
//! │  (validation)   │   │  (plan + execute)   │   │  (JSON / memory)    │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                    │                        ▲
//!                                    ▼                        │
//! ┌─────────────────────────────────────────────┐   ┌─────────────────────┐
//! │              Provisioner                     │◀──│  Teardown Engine    │
//! │  (one remote call per step, classified       │   │  (reverse replay)   │
//! │   failures, NotFound-tolerant deletes)       │   └─────────────────────┘
//! └─────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            NetworkProvider trait (AWS SDK | mock)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use netforge::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> netforge::error::Result<()> {
//!     let topology = NetworkTopology::from_file("network.yml")?;
//!
//!     let provider = Arc::new(MockProvider::new());
//!     let store = Arc::new(JsonStateStore::new("output"));
//!     let orchestrator = Orchestrator::new(Provisioner::new(provider), store);
//!
//!     let state = orchestrator.apply(&topology).await?;
//!     println!("provisioned {} resources", state.resources.len());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod provisioner;
pub mod retry;
pub mod state;
pub mod teardown;
pub mod topology;

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of the most commonly needed types.

    pub use crate::error::{Error, Result};
    pub use crate::orchestrator::{plan, ExecutionPlan, Orchestrator};
    pub use crate::provider::{
        MockProvider, NetworkProvider, ProvisionError, ResourceRequest,
    };
    pub use crate::provisioner::{DeleteOutcome, Provisioner};
    pub use crate::retry::RetryPolicy;
    pub use crate::state::{
        DeploymentState, DeploymentStatus, JsonStateStore, MemoryStateStore,
        ProvisionedResource, ResourceKind, StatePersistence,
    };
    pub use crate::teardown::{TeardownEngine, TeardownReport};
    pub use crate::topology::{NetworkTopology, SubnetSpec, SubnetTier};

    #[cfg(feature = "aws")]
    pub use crate::provider::AwsProvider;
}
