//! The single-process engine: map tasks, shuffle, reduce tasks and the
//! orchestration around them.

use crate::codec::DEFAULT_SYNC_INTERVAL;

pub mod chain;
pub mod compare;
pub mod engine;
pub mod job;
pub mod map;
pub mod reduce;
pub mod shuffle;

pub use chain::{ChainReport, JobChain};
pub use compare::CompareFn;
pub use engine::{Engine, JobHandle};
pub use job::{CounterSnapshot, Job, JobBuilder, JobReport, JobState};

/// Default size of an input split, 32 MiB.
pub const DEFAULT_SPLIT_SIZE: u64 = 32 * 1024 * 1024;

/// Tuning knobs shared by every job an [`Engine`] runs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on concurrently running map or reduce tasks.
    pub workers: usize,
    /// How often a task is attempted before its job fails. 1 disables
    /// retries.
    pub max_task_attempts: u32,
    pub split_size: u64,
    /// Records between sync markers in intermediate and sequence output.
    pub sync_interval: usize,
    /// Prefix in the scratch storage under which jobs keep intermediate
    /// objects.
    pub scratch_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            max_task_attempts: 1,
            split_size: DEFAULT_SPLIT_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            scratch_prefix: "_scratch".to_string(),
        }
    }
}
