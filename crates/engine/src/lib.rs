//! Orchestration engine: admission, scheduling, chunked execution with
//! retry and backoff, cooperative cancellation, and liveness reaping.
//!
//! The [`Orchestrator`] is the shared context every component works
//! against; [`Scheduler`] claims runnable jobs from the store and hands
//! each to a runner task, and [`Reaper`] force-fails jobs that stop
//! making progress.

pub mod cancel;
pub mod config;
mod executor;
pub mod reaper;
pub mod router;
mod runner;
pub mod scheduler;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio_stream::wrappers::ReceiverStream;
use voxflow_capability::{CapabilityRegistry, MediaFetcher};
use voxflow_core::error::CoreError;
use voxflow_core::job::{Job, JobRequest};
use voxflow_core::progress::{ProgressEvent, ProgressPhase};
use voxflow_core::types::JobId;
use voxflow_core::validate::validate_request;
use voxflow_events::ProgressChannel;
use voxflow_store::{BlobStore, JobListQuery, JobStore};

use crate::cancel::CancelRegistry;
pub use crate::config::EngineConfig;
pub use crate::reaper::Reaper;
pub use crate::router::{PoolConfig, PoolSnapshot, ResourceRouter};
pub use crate::scheduler::Scheduler;

/// Shared orchestration context.
///
/// Cheaply cloneable; every clone shares the same store, router, progress
/// channel, and active-job set. The public surface is what the admission
/// layer calls; runners and the scheduler reach the internals directly.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) store: JobStore,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) capabilities: Arc<CapabilityRegistry>,
    pub(crate) fetcher: Arc<dyn MediaFetcher>,
    pub(crate) progress: ProgressChannel,
    pub(crate) router: Arc<ResourceRouter>,
    pub(crate) cancels: Arc<CancelRegistry>,
    pub(crate) config: Arc<EngineConfig>,
    /// Jobs with a live runner in this process; keeps the scheduler from
    /// double-dispatching a job it already claimed.
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl Orchestrator {
    pub fn new(
        store: JobStore,
        blobs: Arc<dyn BlobStore>,
        capabilities: Arc<CapabilityRegistry>,
        fetcher: Arc<dyn MediaFetcher>,
        progress: ProgressChannel,
        config: EngineConfig,
    ) -> Self {
        let router = Arc::new(ResourceRouter::new(&config.pools));
        Self {
            store,
            blobs,
            capabilities,
            fetcher,
            progress,
            router,
            cancels: Arc::new(CancelRegistry::new()),
            config: Arc::new(config),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Admit a job: validate the request, create the `Pending` record,
    /// and open its progress stream with a `Queued` event.
    ///
    /// Invalid requests never produce a job record.
    pub async fn submit(&self, request: JobRequest) -> Result<Job, CoreError> {
        validate_request(&request)?;
        let job = self.store.create(request).await?;
        self.progress
            .publish(job.id, ProgressPhase::Queued, 0, None)
            .await;
        Ok(job)
    }

    /// Cancel a job that is still cancellable.
    ///
    /// The store transition is the authority on cancellability (terminal
    /// jobs and jobs already reassembling reject with a conflict); on
    /// success the runner's token is tripped so in-flight chunk work is
    /// abandoned, and the progress stream ends with a `Cancelled` event.
    pub async fn cancel_job(&self, id: JobId, reason: &str) -> Result<Job, CoreError> {
        let job = self.store.cancel(id, reason).await?;
        self.cancels.cancel(id);
        self.progress
            .publish(
                id,
                ProgressPhase::Cancelled,
                runner::completion_percent(&job),
                Some(reason.to_string()),
            )
            .await;
        Ok(job)
    }

    /// Load a job snapshot.
    pub async fn job(&self, id: JobId) -> Result<Job, CoreError> {
        self.store.load(id).await
    }

    /// List jobs with optional filters and pagination.
    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError> {
        self.store.list(query).await
    }

    /// Current occupancy of every resource pool.
    pub fn pools(&self) -> Vec<PoolSnapshot> {
        self.router.snapshot()
    }

    /// Subscribe to a job's progress stream from `from_seq` (exclusive).
    pub async fn subscribe(&self, id: JobId, from_seq: u64) -> ReceiverStream<ProgressEvent> {
        self.progress.subscribe(id, from_seq).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Claim a job for a runner in this process. False means a runner
    /// already holds it.
    pub(crate) fn claim_active(&self, id: JobId) -> bool {
        self.active.lock().expect("active set poisoned").insert(id)
    }

    pub(crate) fn release_active(&self, id: JobId) {
        self.active.lock().expect("active set poisoned").remove(&id);
    }
}
