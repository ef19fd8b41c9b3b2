//! Session API - high-level interface for DriftDB.
//!
//! A `Session` pairs a `VersionStore` with a branch context and a warning
//! sink. The diff engine resolves bare refs against the session's current
//! branch and reports non-fatal degradations (like a primary key change
//! disabling row diffing) as accumulated warnings.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::hooks::{CommitDataset, HookConfig, HookRegistry, SingleFlight};
use crate::storage::{BranchName, CommitId, StorageError, VersionStore};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Warning code raised when a primary key change disables row-level diffing.
pub const PRIMARY_KEY_CHANGE_WARNING_CODE: u16 = 1105;

/// Warning code raised when any other schema change disables row-level diffing.
pub const SCHEMA_CHANGE_WARNING_CODE: u16 = 1235;

/// A non-fatal warning accumulated on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWarning {
    pub code: u16,
    pub message: String,
}

/// Engine configuration threaded at construction. No ambient globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Create if doesn't exist.
    pub create_if_missing: bool,
    /// Which commit hooks run after a working-set commit.
    pub hooks: HookConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".driftdb"),
            create_if_missing: true,
            hooks: HookConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// A database session: store access plus branch context and warnings.
pub struct Session {
    store: VersionStore,
    current_branch: BranchName,
    warnings: Mutex<Vec<SessionWarning>>,
    hooks: HookRegistry,
    commit_flight: SingleFlight<CommitId>,
    /// key identifying this database in the single-flight map
    database_key: String,
}

impl Session {
    /// Open (or create) a database at the given path with default config.
    pub fn open(path: impl AsRef<Path>) -> SessionResult<Self> {
        Self::with_config(EngineConfig::new(path.as_ref()))
    }

    /// Open a database with explicit configuration.
    pub fn with_config(config: EngineConfig) -> SessionResult<Self> {
        let store = if config.create_if_missing {
            VersionStore::open_or_init(&config.path)?
        } else {
            match VersionStore::open(&config.path) {
                Ok(store) => store,
                Err(StorageError::NotInitialized(p)) => return Err(SessionError::NotFound(p)),
                Err(e) => return Err(e.into()),
            }
        };

        let hooks = HookRegistry::from_config(&config.hooks);
        let database_key = config.path.display().to_string();

        Ok(Self {
            store,
            current_branch: BranchName::main(),
            warnings: Mutex::new(Vec::new()),
            hooks,
            commit_flight: SingleFlight::new(),
            database_key,
        })
    }

    /// The underlying version store.
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// The branch bare refs resolve against.
    pub fn current_branch(&self) -> &BranchName {
        &self.current_branch
    }

    /// Switch the session to another branch.
    pub fn set_current_branch(&mut self, branch: BranchName) {
        self.current_branch = branch;
    }

    /// Record a non-fatal warning.
    pub fn add_warning(&self, code: u16, message: impl Into<String>) {
        self.warnings.lock().push(SessionWarning {
            code,
            message: message.into(),
        });
    }

    /// Drain accumulated warnings.
    pub fn take_warnings(&self) -> Vec<SessionWarning> {
        std::mem::take(&mut *self.warnings.lock())
    }

    /// Current warnings without draining.
    pub fn warnings(&self) -> Vec<SessionWarning> {
        self.warnings.lock().clone()
    }

    /// Commit the staged working set.
    ///
    /// Concurrent callers for the same database are collapsed: one performs
    /// the commit, the rest block and receive its result. Registered commit
    /// hooks run afterward; a failing hook is recorded, never raised.
    pub fn commit_working(&self, message: &str) -> SessionResult<CommitId> {
        let store = self.store.clone();
        let msg = message.to_string();
        let hooks = &self.hooks;

        let commit_id = self
            .commit_flight
            .run(&self.database_key, move || store.commit_working(&msg))?;

        let dataset = CommitDataset {
            commit: commit_id,
            branch: self.current_branch.clone(),
        };
        hooks.execute_all(&dataset);

        Ok(commit_id)
    }
}
