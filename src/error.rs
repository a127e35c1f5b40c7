//! Error types for Netforge.
//!
//! This module defines the top-level error type used by the CLI and the
//! orchestration entry points, including the mapping from error class to
//! process exit status. Component-level errors ([`ProvisionError`],
//! [`StateError`], validation violations) are defined next to the
//! components that produce them and converted into [`Error`] at the
//! orchestration boundary.
//!
//! [`ProvisionError`]: crate::provider::ProvisionError
//! [`StateError`]: crate::state::StateError

use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ProvisionError;
use crate::state::StateError;
use crate::topology::validate::ValidationReport;

/// Result type alias for Netforge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Netforge.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Topology Errors
    // ========================================================================
    /// Error loading or parsing a topology document.
    #[error("Failed to load topology '{path}': {message}")]
    TopologyLoad {
        /// Path to the topology document
        path: PathBuf,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The topology failed validation. The report holds every violation
    /// found, not just the first.
    #[error("Topology validation failed:\n{0}")]
    Validation(ValidationReport),

    // ========================================================================
    // Provisioning Errors
    // ========================================================================
    /// A creation step failed and the run was halted.
    #[error("Provisioning step '{step}' failed: {source}")]
    Provision {
        /// Logical name of the failing resource
        step: String,
        /// Classified provider failure
        #[source]
        source: ProvisionError,
    },

    /// A run is already in progress for this topology.
    #[error("A run for topology '{0}' is already in progress")]
    RunAlreadyActive(String),

    /// The run was cancelled between steps.
    #[error("Run for topology '{0}' was cancelled")]
    Cancelled(String),

    /// The configured provider is not available in this build.
    #[error("Provider '{0}' is not available; rebuild with the matching cargo feature")]
    ProviderUnavailable(String),

    // ========================================================================
    // Teardown Errors
    // ========================================================================
    /// Teardown finished but some resources could not be removed.
    #[error("Teardown incomplete: {unremoved} resource(s) could not be removed")]
    TeardownIncomplete {
        /// Number of resources left behind
        unremoved: usize,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// State store failure.
    #[error("State store error: {0}")]
    State(#[from] StateError),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new topology load error.
    pub fn topology_load(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::TopologyLoad {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new provisioning step error.
    pub fn provision(step: impl Into<String>, source: ProvisionError) -> Self {
        Self::Provision {
            step: step.into(),
            source,
        }
    }

    /// Returns the error code for CLI exit status.
    ///
    /// Validation failures, provisioning failures, incomplete teardowns
    /// and state-store failures are distinguishable by exit code alone.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TopologyLoad { .. } | Error::Validation(_) => 2,
            Error::Provision { .. }
            | Error::RunAlreadyActive(_)
            | Error::Cancelled(_)
            | Error::ProviderUnavailable(_) => 3,
            Error::TeardownIncomplete { .. } => 4,
            Error::State(_) => 5,
            _ => 1,
        }
    }
}
