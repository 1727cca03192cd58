//! Job repository: the single source of truth for job state.
//!
//! All writes go through version-checked compare-and-swap on the
//! underlying [`MetaStore`] so concurrent scheduler/executor writers can
//! never both apply a transition from the same prior state. The loser of
//! a race gets [`CoreError::StaleState`] and is expected to reload.

use std::sync::Arc;

use voxflow_core::error::{CoreError, JobError};
use voxflow_core::job::{Chunk, Job, JobKind, JobRequest, JobState};
use voxflow_core::types::JobId;

use crate::meta::{MetaStore, StoreError, VersionedValue};

/// Default page size for job listing.
pub const DEFAULT_LIMIT: usize = 50;

/// Maximum page size for job listing.
pub const MAX_LIMIT: usize = 100;

/// Bounded internal retry for benign CAS races (parallel chunk updates).
const CAS_RETRY_LIMIT: u32 = 32;

const KEY_PREFIX: &str = "job/";

fn job_key(id: JobId) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Filter and pagination for job listing.
#[derive(Debug, Clone, Default)]
pub struct JobListQuery {
    pub state: Option<JobState>,
    pub kind: Option<JobKind>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// CAS-guarded job store over a [`MetaStore`].
#[derive(Clone)]
pub struct JobStore {
    meta: Arc<dyn MetaStore>,
}

impl JobStore {
    pub fn new(meta: Arc<dyn MetaStore>) -> Self {
        Self { meta }
    }

    /// Admit a new job in `Pending`. Ids are UUIDv7 and never reused; a
    /// key collision is therefore a storage fault, not a conflict.
    pub async fn create(&self, request: JobRequest) -> Result<Job, CoreError> {
        let job = Job::admit(voxflow_core::types::new_job_id(), request, chrono::Utc::now());
        self.meta
            .insert(&job_key(job.id), encode(&job)?)
            .await
            .map_err(storage_err)?;
        tracing::info!(job_id = %job.id, kind = %job.kind, "Job admitted");
        Ok(job)
    }

    /// Load a job snapshot.
    pub async fn load(&self, id: JobId) -> Result<Job, CoreError> {
        Ok(self.load_versioned(id).await?.0)
    }

    async fn load_versioned(&self, id: JobId) -> Result<(Job, u64), CoreError> {
        let entry = self
            .meta
            .get(&job_key(id))
            .await
            .map_err(storage_err)?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            })?;
        Ok((decode(&entry)?, entry.version))
    }

    /// Apply a single state transition guarded by the expected prior
    /// state. `mutate` runs after the state is updated and may fill in
    /// chunks, results, or errors.
    ///
    /// Fails with `StaleState` when another writer got there first, and
    /// with `Conflict` when the edge itself is illegal (a logic error in
    /// the caller, never retried).
    pub async fn transition<F>(
        &self,
        id: JobId,
        expected: JobState,
        to: JobState,
        mutate: F,
    ) -> Result<Job, CoreError>
    where
        F: FnOnce(&mut Job),
    {
        let (mut job, version) = self.load_versioned(id).await?;

        if job.state != expected {
            return Err(CoreError::StaleState {
                job_id: id,
                expected,
                actual: job.state,
            });
        }
        if !expected.can_transition_to(to) {
            return Err(CoreError::Conflict(format!(
                "illegal transition {expected} -> {to} on job {id}"
            )));
        }

        apply_transition(&mut job, to);
        mutate(&mut job);

        match self
            .meta
            .compare_and_swap(&job_key(id), version, encode(&job)?)
            .await
        {
            Ok(_) => {
                tracing::debug!(job_id = %id, from = %expected, to = %to, "Job transition applied");
                Ok(job)
            }
            Err(StoreError::VersionMismatch { .. }) => {
                let actual = self.load(id).await.map(|j| j.state).unwrap_or(expected);
                Err(CoreError::StaleState {
                    job_id: id,
                    expected,
                    actual,
                })
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Update one chunk record without changing the job state.
    ///
    /// Chunk executors of the same job update disjoint chunks, so a CAS
    /// loss here is a benign interleave: the update is retried against the
    /// fresh record (bounded). The job must still be in `expected` state.
    pub async fn update_chunk<F>(
        &self,
        id: JobId,
        expected: JobState,
        sequence_index: u32,
        mutate: F,
    ) -> Result<Job, CoreError>
    where
        F: Fn(&mut Chunk),
    {
        for _ in 0..CAS_RETRY_LIMIT {
            let (mut job, version) = self.load_versioned(id).await?;
            if job.state != expected {
                return Err(CoreError::StaleState {
                    job_id: id,
                    expected,
                    actual: job.state,
                });
            }
            let chunk = job
                .chunk_mut(sequence_index)
                .ok_or_else(|| CoreError::NotFound {
                    entity: "Chunk",
                    id: format!("{id}/{sequence_index}"),
                })?;
            mutate(chunk);
            job.updated_at = chrono::Utc::now();

            match self
                .meta
                .compare_and_swap(&job_key(id), version, encode(&job)?)
                .await
            {
                Ok(_) => return Ok(job),
                Err(StoreError::VersionMismatch { .. }) => continue,
                Err(e) => return Err(storage_err(e)),
            }
        }
        Err(CoreError::Storage(format!(
            "chunk update on job {id} exceeded CAS retry limit"
        )))
    }

    /// Cancel a job if it is still cancellable.
    ///
    /// Cancellable means `Pending`, `Chunking`, `Retrying`, or `Running`
    /// with chunk work still outstanding. Once every chunk is `Done` the
    /// job is in reassembly and cancellation is rejected, preserving the
    /// no-partial-COMPLETED invariant. Terminal jobs reject with a
    /// conflict as well.
    pub async fn cancel(&self, id: JobId, reason: &str) -> Result<Job, CoreError> {
        for _ in 0..CAS_RETRY_LIMIT {
            let (job, _) = self.load_versioned(id).await?;

            if job.state.is_terminal() {
                return Err(CoreError::Conflict(format!(
                    "job {id} is already {} and cannot be cancelled",
                    job.state
                )));
            }
            if job.state == JobState::Running && job.all_chunks_done() {
                return Err(CoreError::Conflict(format!(
                    "job {id} is reassembling and can no longer be cancelled"
                )));
            }

            let error = JobError::new(voxflow_core::ErrorKind::Cancelled, reason.to_string());
            match self
                .transition(id, job.state, JobState::Failed, |j| {
                    j.error = Some(error);
                })
                .await
            {
                Ok(job) => {
                    tracing::info!(job_id = %id, reason, "Job cancelled");
                    return Ok(job);
                }
                // Someone moved the job between load and CAS; re-evaluate
                // cancellability against the fresh state.
                Err(CoreError::StaleState { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::Storage(format!(
            "cancel of job {id} exceeded CAS retry limit"
        )))
    }

    /// Jobs the scheduler may claim: `Pending` or `Retrying`, oldest
    /// first so tail latency stays bounded.
    pub async fn claimable(&self) -> Result<Vec<Job>, CoreError> {
        let mut jobs = self.load_all().await?;
        jobs.retain(|j| matches!(j.state, JobState::Pending | JobState::Retrying));
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// List jobs, newest first, with optional state/kind filters and
    /// capped pagination.
    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = query.offset.unwrap_or(0);

        let mut jobs = self.load_all().await?;
        if let Some(state) = query.state {
            jobs.retain(|j| j.state == state);
        }
        if let Some(kind) = query.kind {
            jobs.retain(|j| j.kind == kind);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    /// Non-terminal jobs whose last recorded activity predates `cutoff`.
    /// Consumed by the stale-job reaper.
    pub async fn stalled_since(
        &self,
        cutoff: voxflow_core::types::Timestamp,
    ) -> Result<Vec<Job>, CoreError> {
        let mut jobs = self.load_all().await?;
        jobs.retain(|j| !j.state.is_terminal() && j.updated_at < cutoff);
        Ok(jobs)
    }

    async fn load_all(&self) -> Result<Vec<Job>, CoreError> {
        let entries = self
            .meta
            .list_prefix(KEY_PREFIX)
            .await
            .map_err(storage_err)?;
        entries.iter().map(|(_, v)| decode(v)).collect()
    }
}

/// State-entry bookkeeping shared by every transition: timestamps are
/// monotonically non-decreasing, `completed_at` is set exactly once, and
/// `retry_count` counts `Running -> Retrying` edges only.
fn apply_transition(job: &mut Job, to: JobState) {
    let now = chrono::Utc::now();
    job.updated_at = now;
    if to == JobState::Retrying {
        job.retry_count += 1;
    }
    if matches!(to, JobState::Chunking | JobState::Running) && job.started_at.is_none() {
        job.started_at = Some(now);
    }
    if to.is_terminal() && job.completed_at.is_none() {
        job.completed_at = Some(now);
    }
    job.state = to;
}

fn encode(job: &Job) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(job).map_err(|e| CoreError::Storage(e.to_string()))
}

fn decode(entry: &VersionedValue) -> Result<Job, CoreError> {
    serde_json::from_value(entry.value.clone()).map_err(|e| CoreError::Storage(e.to_string()))
}

fn storage_err(e: StoreError) -> CoreError {
    CoreError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use voxflow_core::job::{ChunkState, SliceRange, SourceInput};
    use voxflow_core::ErrorKind;

    use super::*;
    use crate::meta::MemoryMetaStore;

    fn store() -> JobStore {
        JobStore::new(Arc::new(MemoryMetaStore::new()))
    }

    fn translate_request() -> JobRequest {
        JobRequest::Translate {
            source: SourceInput::Blob {
                reference: "audio-1".into(),
            },
            target_language: "en".into(),
            source_language: None,
        }
    }

    async fn running_job_with_chunks(store: &JobStore, chunk_count: u32) -> Job {
        let job = store.create(translate_request()).await.unwrap();
        store
            .transition(job.id, JobState::Pending, JobState::Chunking, |_| {})
            .await
            .unwrap();
        store
            .transition(job.id, JobState::Chunking, JobState::Running, |j| {
                for i in 0..chunk_count {
                    let start = u64::from(i) * 100;
                    j.chunks.push(Chunk::new(i, SliceRange::new(start, start + 100)));
                }
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn created_job_is_pending_and_loadable() {
        let store = store();
        let job = store.create(translate_request()).await.unwrap();

        let loaded = store.load(job.id).await.unwrap();
        assert_eq!(loaded, job);
        assert_eq!(loaded.state, JobState::Pending);
        assert!(loaded.started_at.is_none());
        assert!(loaded.chunks.is_empty());
    }

    #[tokio::test]
    async fn transition_sets_lifecycle_timestamps_once() {
        let store = store();
        let job = running_job_with_chunks(&store, 1).await;
        let started = job.started_at.expect("started_at set on first Running entry");

        let done = store
            .transition(job.id, JobState::Running, JobState::Completed, |j| {
                j.chunks[0].state = ChunkState::Done;
                j.result_ref = Some("artifact-1".into());
            })
            .await
            .unwrap();
        assert_eq!(done.started_at, Some(started));
        assert!(done.completed_at.is_some());
        assert!(done.completed_at.unwrap() >= started);
    }

    #[tokio::test]
    async fn concurrent_transition_loser_observes_stale_state() {
        let store = store();
        let job = store.create(translate_request()).await.unwrap();

        // Two schedulers race to claim the same pending job.
        store
            .transition(job.id, JobState::Pending, JobState::Running, |_| {})
            .await
            .unwrap();
        let err = store
            .transition(job.id, JobState::Pending, JobState::Running, |_| {})
            .await
            .unwrap_err();
        assert_matches!(
            err,
            CoreError::StaleState {
                expected: JobState::Pending,
                actual: JobState::Running,
                ..
            }
        );
    }

    #[tokio::test]
    async fn illegal_edge_is_a_conflict_not_a_race() {
        let store = store();
        let job = store.create(translate_request()).await.unwrap();
        let err = store
            .transition(job.id, JobState::Pending, JobState::Completed, |_| {})
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(_));
    }

    #[tokio::test]
    async fn retry_count_increments_only_on_retrying_edge() {
        let store = store();
        let job = running_job_with_chunks(&store, 1).await;
        assert_eq!(job.retry_count, 0);

        let retried = store
            .transition(job.id, JobState::Running, JobState::Retrying, |_| {})
            .await
            .unwrap();
        assert_eq!(retried.retry_count, 1);

        let running = store
            .transition(job.id, JobState::Retrying, JobState::Running, |_| {})
            .await
            .unwrap();
        assert_eq!(running.retry_count, 1);
    }

    #[tokio::test]
    async fn terminal_job_reads_are_idempotent() {
        let store = store();
        let job = running_job_with_chunks(&store, 1).await;
        store
            .transition(job.id, JobState::Running, JobState::Failed, |j| {
                j.error = Some(JobError::new(ErrorKind::CapabilityTransient, "gave up"));
            })
            .await
            .unwrap();

        let first = store.load(job.id).await.unwrap();
        let second = store.load(job.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.error.as_ref().unwrap().kind, ErrorKind::CapabilityTransient);
        assert!(first.result_ref.is_none());
    }

    #[tokio::test]
    async fn parallel_chunk_updates_both_land() {
        let store = store();
        let job = running_job_with_chunks(&store, 2).await;

        let (a, b) = tokio::join!(
            store.update_chunk(job.id, JobState::Running, 0, |c| {
                c.state = ChunkState::Done;
                c.output_ref = Some("out-0".into());
            }),
            store.update_chunk(job.id, JobState::Running, 1, |c| {
                c.state = ChunkState::Done;
                c.output_ref = Some("out-1".into());
            }),
        );
        a.unwrap();
        b.unwrap();

        let loaded = store.load(job.id).await.unwrap();
        assert!(loaded.all_chunks_done());
        assert_eq!(loaded.chunk(0).unwrap().output_ref.as_deref(), Some("out-0"));
        assert_eq!(loaded.chunk(1).unwrap().output_ref.as_deref(), Some("out-1"));
    }

    #[tokio::test]
    async fn cancel_running_job_with_outstanding_chunks() {
        let store = store();
        let job = running_job_with_chunks(&store, 2).await;

        let cancelled = store.cancel(job.id, "user request").await.unwrap();
        assert_eq!(cancelled.state, JobState::Failed);
        assert_eq!(cancelled.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert!(cancelled.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_reassembly_started() {
        let store = store();
        let job = running_job_with_chunks(&store, 1).await;
        store
            .update_chunk(job.id, JobState::Running, 0, |c| {
                c.state = ChunkState::Done;
                c.output_ref = Some("out".into());
            })
            .await
            .unwrap();

        let err = store.cancel(job.id, "too late").await.unwrap_err();
        assert_matches!(err, CoreError::Conflict(_));
    }

    #[tokio::test]
    async fn cancel_is_rejected_on_terminal_jobs() {
        let store = store();
        let job = running_job_with_chunks(&store, 1).await;
        store.cancel(job.id, "first").await.unwrap();
        assert_matches!(
            store.cancel(job.id, "second").await.unwrap_err(),
            CoreError::Conflict(_)
        );
    }

    #[tokio::test]
    async fn claimable_returns_pending_and_retrying_oldest_first() {
        let store = store();
        let first = store.create(translate_request()).await.unwrap();
        let second = store.create(translate_request()).await.unwrap();
        let third = store.create(translate_request()).await.unwrap();

        // second is running (not claimable); third is retrying (claimable).
        store
            .transition(second.id, JobState::Pending, JobState::Running, |_| {})
            .await
            .unwrap();
        store
            .transition(third.id, JobState::Pending, JobState::Running, |_| {})
            .await
            .unwrap();
        store
            .transition(third.id, JobState::Running, JobState::Retrying, |_| {})
            .await
            .unwrap();

        let claimable = store.claimable().await.unwrap();
        let ids: Vec<JobId> = claimable.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn stalled_since_skips_terminal_jobs() {
        let store = store();
        let live = running_job_with_chunks(&store, 2).await;
        let done = running_job_with_chunks(&store, 1).await;
        store
            .transition(done.id, JobState::Running, JobState::Completed, |j| {
                j.chunks[0].state = ChunkState::Done;
                j.result_ref = Some("out".into());
            })
            .await
            .unwrap();

        let horizon = chrono::Utc::now() + chrono::Duration::hours(1);
        let stalled = store.stalled_since(horizon).await.unwrap();
        let ids: Vec<JobId> = stalled.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![live.id]);

        let recent = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(store.stalled_since(recent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_state_and_paginates_newest_first() {
        let store = store();
        for _ in 0..3 {
            store.create(translate_request()).await.unwrap();
        }
        let newest = store.create(translate_request()).await.unwrap();

        let page = store
            .list(&JobListQuery {
                state: Some(JobState::Pending),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, newest.id);

        let rest = store
            .list(&JobListQuery {
                offset: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }
}
