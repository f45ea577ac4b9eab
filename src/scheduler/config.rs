use serde::{Deserialize, Serialize};

/// How the scheduler picks a worker for a new call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentPolicy {
    /// The live worker with the fewest queued and running calls, lowest slot on ties.
    #[default]
    LeastLoaded,
    /// Live workers in slot order, wrapping around.
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. Zero is allowed and yields a pool that
    /// rejects every call.
    pub workers: usize,
    /// Prefix of worker thread names, the slot index is appended.
    pub thread_name: String,
    pub assignment: AssignmentPolicy,
    /// Number of independently locked blocks in the shared region.
    pub shared_blocks: usize,
    /// Size in bytes of each shared block.
    pub shared_block_size: usize,
    /// Initial configuration handed to every worker.
    pub worker: WorkerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            thread_name: "chizu-worker".into(),
            assignment: AssignmentPolicy::default(),
            shared_blocks: 8,
            shared_block_size: 64 * 1024,
            worker: WorkerConfig::default(),
        }
    }
}

/// Settings a worker reads while running calls. Replaceable at runtime via
/// [`Scheduler::configure`](crate::Scheduler::configure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Convert procedure panics into [`ProcedureError::Panicked`](crate::ProcedureError::Panicked).
    /// When off, a panic kills the worker thread.
    pub catch_panics: bool,
    /// Free-form label procedures can read from their context.
    pub label: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            label: None,
        }
    }
}
