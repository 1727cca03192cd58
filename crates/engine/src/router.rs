//! Resource router: named capacity pools with non-blocking acquisition.
//!
//! Each job kind maps statically to one pool (`JobKind::pool`). `acquire`
//! never blocks — on saturation it reports `Busy` so the scheduler can
//! requeue instead of holding a task waiting. Slot accounting is strictly
//! paired: the returned [`SlotToken`] releases its slot on drop, on every
//! exit path including abnormal termination.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configured capacity for one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: String,
    pub max_concurrency: usize,
}

/// Acquisition outcome other than success.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AcquireError {
    /// All slots in use. A scheduling signal, not a failure.
    #[error("pool \"{0}\" is saturated")]
    Busy(String),

    /// No pool with that name is configured — a wiring error.
    #[error("unknown pool \"{0}\"")]
    UnknownPool(String),
}

/// A held slot. Dropping it releases the slot back to its pool.
pub struct SlotToken {
    pool: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl SlotToken {
    /// The pool this slot belongs to.
    pub fn pool(&self) -> &str {
        self.pool
    }
}

impl std::fmt::Debug for SlotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotToken").field("pool", &self.pool).finish()
    }
}

/// Point-in-time pool utilisation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub name: String,
    pub max_concurrency: usize,
    pub in_use: usize,
}

struct Pool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

/// Maps pool names to bounded slot pools.
pub struct ResourceRouter {
    pools: HashMap<&'static str, Pool>,
}

impl ResourceRouter {
    /// Build the router from configured pools. Pool names are leaked into
    /// 'static strings: the set is small, fixed at startup, and lives for
    /// the process.
    pub fn new(configs: &[PoolConfig]) -> Self {
        let mut pools = HashMap::new();
        for config in configs {
            let name: &'static str = Box::leak(config.name.clone().into_boxed_str());
            pools.insert(
                name,
                Pool {
                    name,
                    semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
                    max_concurrency: config.max_concurrency,
                },
            );
        }
        Self { pools }
    }

    /// Try to take one slot from the named pool. Never blocks.
    pub fn acquire(&self, pool_name: &str) -> Result<SlotToken, AcquireError> {
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| AcquireError::UnknownPool(pool_name.to_string()))?;
        match Arc::clone(&pool.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(SlotToken {
                pool: pool.name,
                _permit: permit,
            }),
            Err(_) => Err(AcquireError::Busy(pool_name.to_string())),
        }
    }

    /// Utilisation snapshot across all pools, name-ordered.
    pub fn snapshot(&self) -> Vec<PoolSnapshot> {
        let mut snaps: Vec<PoolSnapshot> = self
            .pools
            .values()
            .map(|p| PoolSnapshot {
                name: p.name.to_string(),
                max_concurrency: p.max_concurrency,
                in_use: p.max_concurrency - p.semaphore.available_permits(),
            })
            .collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }
}
