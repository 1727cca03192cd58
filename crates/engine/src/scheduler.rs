//! Polling scheduler: claims runnable jobs and hands each to a runner.
//!
//! One scheduler task per process. Multi-process deployments stay safe
//! through the store's CAS transitions: a duplicate claim loses the race
//! and yields instead of double-running the job.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use voxflow_core::error::CoreError;

use crate::router::AcquireError;
use crate::{runner, Orchestrator};

pub struct Scheduler {
    ctx: Orchestrator,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { ctx: orchestrator }
    }

    /// Poll loop; runs until `shutdown` is tripped. In-flight runners are
    /// not interrupted by shutdown — they hold their own tokens.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.ctx.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.ctx.config.poll_interval, "Scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(err) = self.dispatch_once().await {
                        tracing::warn!(%err, "Scheduling pass failed");
                    }
                }
            }
        }
    }

    /// One scheduling pass: dispatch every claimable job that can get a
    /// pool slot, oldest first. Saturated pools leave jobs queued for the
    /// next pass rather than blocking the loop.
    pub async fn dispatch_once(&self) -> Result<usize, CoreError> {
        let mut dispatched = 0;
        for job in self.ctx.store.claimable().await? {
            if !self.ctx.claim_active(job.id) {
                // A runner in this process already owns it (in-process
                // retry backoff counts).
                continue;
            }

            match self.ctx.router.acquire(job.kind.pool()) {
                Ok(slot) => {
                    tracing::info!(
                        job_id = %job.id,
                        kind = %job.kind,
                        state = %job.state,
                        pool = job.kind.pool(),
                        "Dispatching job"
                    );
                    dispatched += 1;
                    tokio::spawn(runner::run(self.ctx.clone(), job, slot));
                }
                Err(AcquireError::Busy(pool)) => {
                    tracing::debug!(job_id = %job.id, pool, "Pool saturated, job stays queued");
                    self.ctx.release_active(job.id);
                }
                Err(err @ AcquireError::UnknownPool(_)) => {
                    // The kind maps to a pool nobody configured.
                    tracing::error!(job_id = %job.id, %err, "No pool for job kind, failing job");
                    runner::fail_job(&self.ctx, job.id, CoreError::Storage(err.to_string())).await;
                    self.ctx.release_active(job.id);
                }
            }
        }
        Ok(dispatched)
    }
}
