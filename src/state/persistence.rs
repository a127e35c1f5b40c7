//! State persistence backends.
//!
//! Two backends implement the [`StatePersistence`] trait:
//! - **JSON**: one `<topology>-state.json` document per topology under a
//!   state directory, replaced atomically on every save.
//! - **Memory**: in-memory storage for tests.
//!
//! The durability contract: [`StatePersistence::append`] persists the
//! state before returning, so the orchestrator never proceeds to the
//! next step with the previous one unrecorded. A crash loses at most the
//! in-flight step.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use super::{DeploymentState, ProvisionedResource, StateError, StateResult};

/// Trait for deployment-state persistence implementations.
pub trait StatePersistence: Send + Sync {
    /// Persist the state document, atomically replacing any previous one.
    fn save(&self, state: &DeploymentState) -> StateResult<()>;

    /// Load the state document for a topology.
    fn load(&self, topology: &str) -> StateResult<DeploymentState>;

    /// Whether a state document exists for a topology.
    fn exists(&self, topology: &str) -> bool;

    /// Record a freshly created resource and persist before returning.
    fn append(
        &self,
        state: &mut DeploymentState,
        resource: ProvisionedResource,
    ) -> StateResult<()> {
        state.record(resource);
        self.save(state)
    }
}

// ============================================================================
// JSON State Store
// ============================================================================

/// Where a JSON store reads and writes its documents.
#[derive(Debug, Clone)]
enum Location {
    /// A directory holding one `<topology>-state.json` per topology.
    Dir(PathBuf),
    /// A single pinned file, used when operating on an explicit
    /// state-document path (teardown input).
    File(PathBuf),
}

/// JSON file-based state store.
pub struct JsonStateStore {
    location: Location,
}

impl JsonStateStore {
    /// Create a store rooted at a state directory. The directory is
    /// created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Dir(dir.into()),
        }
    }

    /// Create a store pinned to one explicit state-document path.
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
        }
    }

    /// Read a state document directly from a path.
    pub fn load_file(path: impl AsRef<Path>) -> StateResult<DeploymentState> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StateError::NotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn path_for(&self, topology: &str) -> PathBuf {
        match &self.location {
            Location::Dir(dir) => dir.join(format!("{}-state.json", topology)),
            Location::File(path) => path.clone(),
        }
    }
}

impl StatePersistence for JsonStateStore {
    fn save(&self, state: &DeploymentState) -> StateResult<()> {
        let path = self.path_for(&state.topology);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        // Write to a temporary file in the same directory, then rename
        // over the target, so readers never observe a partial document.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| StateError::Persist(e.to_string()))?;

        debug!(topology = %state.topology, path = %path.display(), "state persisted");
        Ok(())
    }

    fn load(&self, topology: &str) -> StateResult<DeploymentState> {
        let path = self.path_for(topology);
        if !path.exists() {
            return Err(StateError::NotFound(topology.to_string()));
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn exists(&self, topology: &str) -> bool {
        self.path_for(topology).exists()
    }
}

// ============================================================================
// Memory State Store
// ============================================================================

/// In-memory state store for tests.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, DeploymentState>>,
}

impl MemoryStateStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored state documents.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl StatePersistence for MemoryStateStore {
    fn save(&self, state: &DeploymentState) -> StateResult<()> {
        self.states
            .write()
            .insert(state.topology.clone(), state.clone());
        Ok(())
    }

    fn load(&self, topology: &str) -> StateResult<DeploymentState> {
        self.states
            .read()
            .get(topology)
            .cloned()
            .ok_or_else(|| StateError::NotFound(topology.to_string()))
    }

    fn exists(&self, topology: &str) -> bool {
        self.states.read().contains_key(topology)
    }
}
