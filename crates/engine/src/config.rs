//! Engine tunables, assembled by the binary from environment config.

use std::time::Duration;

use voxflow_core::chunking::ChunkPolicy;
use voxflow_core::job::{POOL_CPU, POOL_GPU};
use voxflow_core::retry::RetryPolicy;

use crate::router::PoolConfig;

/// Default scheduler polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on a single capability invocation.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Default liveness window before the reaper force-fails a stuck job.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(2 * 3600);

/// Default interval between reaper passes.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Orchestration tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chunk_policy: ChunkPolicy,
    pub retry: RetryPolicy,
    pub pools: Vec<PoolConfig>,
    /// Scheduler poll interval.
    pub poll_interval: Duration,
    /// Hard bound on one capability call; expiry is a retryable failure.
    pub execution_timeout: Duration,
    /// Non-terminal jobs with no activity for this long are force-failed.
    pub liveness_window: Duration,
    /// Interval between reaper passes.
    pub reaper_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        const MB: u64 = 1024 * 1024;
        Self {
            chunk_policy: ChunkPolicy::new(100 * MB, 100 * MB, 2 * MB),
            retry: RetryPolicy::default(),
            pools: vec![
                PoolConfig {
                    name: POOL_GPU.to_string(),
                    max_concurrency: 2,
                },
                PoolConfig {
                    name: POOL_CPU.to_string(),
                    max_concurrency: 4,
                },
            ],
            poll_interval: DEFAULT_POLL_INTERVAL,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}
