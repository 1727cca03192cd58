//! Stale-job reaper: force-fails jobs with no recent activity and prunes
//! progress state for long-terminated jobs.
//!
//! A job whose record has not been written for the liveness window is
//! stuck — its runner died, or an external engine is wedged past every
//! timeout. Reaping goes through the normal cancel path so the chunk
//! records and progress stream end consistently.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use voxflow_core::error::CoreError;

use crate::Orchestrator;

pub struct Reaper {
    ctx: Orchestrator,
}

impl Reaper {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { ctx: orchestrator }
    }

    /// Reaper loop; runs until `shutdown` is tripped.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.ctx.config.reaper_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval = ?self.ctx.config.reaper_interval,
            window = ?self.ctx.config.liveness_window,
            "Reaper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Reaper stopped");
                    break;
                }
                _ = tick.tick() => {
                    match self.reap_once().await {
                        Ok(0) => {}
                        Ok(reaped) => tracing::warn!(reaped, "Reaped stalled jobs"),
                        Err(err) => tracing::warn!(%err, "Reaper pass failed"),
                    }
                }
            }
        }
    }

    /// One pass: fail every job whose last activity predates the liveness
    /// window, then drop retained progress for long-terminated jobs.
    pub async fn reap_once(&self) -> Result<usize, CoreError> {
        let window = chrono::Duration::from_std(self.ctx.config.liveness_window)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        let cutoff = chrono::Utc::now() - window;

        let mut reaped = 0;
        for job in self.ctx.store.stalled_since(cutoff).await? {
            match self
                .ctx
                .cancel_job(job.id, "no activity within the liveness window")
                .await
            {
                Ok(_) => {
                    tracing::warn!(job_id = %job.id, state = %job.state, "Reaped stalled job");
                    reaped += 1;
                }
                // Finished or entered reassembly between the scan and the
                // cancel; leave it alone.
                Err(CoreError::Conflict(_)) => {}
                Err(err) => {
                    tracing::warn!(job_id = %job.id, %err, "Could not reap stalled job");
                }
            }
        }

        self.ctx
            .progress
            .prune_terminated(self.ctx.config.liveness_window)
            .await;
        Ok(reaped)
    }
}
