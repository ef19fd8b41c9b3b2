//! Commit hooks and the single-flight commit guard.
//!
//! Hooks observe successful working-set commits. They run in registration
//! order and are isolated from the commit path: a hook that returns an
//! error is recorded and swapped for a logging stand-in, it never causes
//! the commit itself to fail.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::storage::{BranchName, CommitId, StorageError, StorageResult};

/// What a commit hook gets to see: the new commit and the branch it landed on.
#[derive(Debug, Clone)]
pub struct CommitDataset {
    pub commit: CommitId,
    pub branch: BranchName,
}

/// Work a hook wants run after every hook has observed the commit.
pub enum DeferredWork {
    None,
    Background(Box<dyn FnOnce() + Send>),
}

/// A hook invoked after a successful working-set commit.
pub trait CommitHook: Send + Sync {
    /// Name used in log records.
    fn name(&self) -> &str;

    /// Whether this hook should be installed for a new database.
    fn should_install(&self) -> bool {
        true
    }

    /// Observe a commit. Returning an error demotes this hook to a logging
    /// stand-in; it does not affect the commit.
    fn execute(&self, dataset: &CommitDataset) -> StorageResult<DeferredWork>;
}

/// Built-in hook that records each commit via `tracing`.
pub struct LoggingHook;

impl CommitHook for LoggingHook {
    fn name(&self) -> &str {
        "log-commits"
    }

    fn execute(&self, dataset: &CommitDataset) -> StorageResult<DeferredWork> {
        info!(
            commit = %dataset.commit.short(),
            branch = %dataset.branch,
            "working set committed"
        );
        Ok(DeferredWork::None)
    }
}

/// Stand-in installed in place of a hook that failed. Records the original
/// failure on every subsequent commit instead of re-running the hook.
struct FailedHookStandIn {
    original_name: String,
    error: String,
}

impl CommitHook for FailedHookStandIn {
    fn name(&self) -> &str {
        &self.original_name
    }

    fn execute(&self, dataset: &CommitDataset) -> StorageResult<DeferredWork> {
        warn!(
            hook = %self.original_name,
            error = %self.error,
            commit = %dataset.commit.short(),
            "commit hook disabled after earlier failure"
        );
        Ok(DeferredWork::None)
    }
}

/// Selects which commit hooks run. Threaded explicitly at construction.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Install the built-in commit logging hook.
    pub log_commits: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self { log_commits: true }
    }
}

/// Ordered set of installed hooks.
pub struct HookRegistry {
    hooks: Mutex<Vec<Box<dyn CommitHook>>>,
}

impl HookRegistry {
    /// Build a registry from config, installing built-ins whose
    /// `should_install` agrees.
    pub fn from_config(config: &HookConfig) -> Self {
        let registry = Self {
            hooks: Mutex::new(Vec::new()),
        };
        if config.log_commits {
            registry.register(Box::new(LoggingHook));
        }
        registry
    }

    /// Append a hook. Hooks run in registration order.
    pub fn register(&self, hook: Box<dyn CommitHook>) {
        if hook.should_install() {
            self.hooks.lock().push(hook);
        }
    }

    /// Number of installed hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    /// Run every hook against the dataset. A failing hook is replaced by a
    /// stand-in that logs the failure on later commits. Deferred work runs
    /// after all hooks have observed the commit.
    pub fn execute_all(&self, dataset: &CommitDataset) {
        let mut deferred = Vec::new();

        {
            let mut hooks = self.hooks.lock();
            for slot in hooks.iter_mut() {
                match slot.execute(dataset) {
                    Ok(DeferredWork::None) => {}
                    Ok(DeferredWork::Background(work)) => deferred.push(work),
                    Err(e) => {
                        warn!(
                            hook = %slot.name(),
                            error = %e,
                            commit = %dataset.commit.short(),
                            "commit hook failed, replacing with logging stand-in"
                        );
                        *slot = Box::new(FailedHookStandIn {
                            original_name: slot.name().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        for work in deferred {
            work();
        }
    }
}

/// State of one in-flight run.
enum FlightState<T> {
    Running,
    Done(Result<T, String>),
}

struct Flight<T> {
    state: Mutex<FlightState<T>>,
    cvar: Condvar,
}

/// Per-key single-flight: concurrent callers for the same key collapse into
/// one run, the rest block and receive the in-flight result.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` under the key, or join an in-flight run for the same key.
    ///
    /// A joined caller observes the leader's error only through its message.
    pub fn run<F>(&self, key: &str, f: F) -> StorageResult<T>
    where
        F: FnOnce() -> StorageResult<T>,
    {
        let (flight, leader) = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let flight = Arc::new(Flight {
                        state: Mutex::new(FlightState::Running),
                        cvar: Condvar::new(),
                    });
                    flights.insert(key.to_string(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if leader {
            let result = f();

            let shared = match &result {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(e.to_string()),
            };
            *flight.state.lock() = FlightState::Done(shared);
            flight.cvar.notify_all();

            self.flights.lock().remove(key);
            result
        } else {
            let mut state = flight.state.lock();
            while matches!(*state, FlightState::Running) {
                flight.cvar.wait(&mut state);
            }
            match &*state {
                FlightState::Done(Ok(v)) => Ok(v.clone()),
                FlightState::Done(Err(msg)) => Err(StorageError::Internal(msg.clone())),
                FlightState::Running => unreachable!(),
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
