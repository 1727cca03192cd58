//! Job runner: drives one claimed job from chunk planning through waves
//! of chunk execution to a terminal state.
//!
//! Chunk execution proceeds in waves. A wave dispatches every chunk that
//! is not yet `Done`, each behind a pool slot; when it settles, the job
//! either completes, retries the failed chunks after a backoff (completed
//! chunk outputs are never recomputed), or fails. `StaleState` from the
//! store means another writer finished the job, and the runner simply
//! yields.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use voxflow_capability::{CapabilityOutput, ChunkInput, FetchError};
use voxflow_core::chunking::{plan_chunks, reassemble, ChunkOutput};
use voxflow_core::error::CoreError;
use voxflow_core::job::{Chunk, ChunkState, Job, JobRequest, JobState, SourceInput};
use voxflow_core::progress::ProgressPhase;
use voxflow_core::types::JobId;
use voxflow_store::StoreError;

use crate::executor::{self, ChunkArtifact};
use crate::router::{AcquireError, SlotToken};
use crate::Orchestrator;

/// How long a runner waits between attempts to get a pool slot for a
/// sibling chunk.
const SLOT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Overall completion estimate from the chunk records.
pub(crate) fn completion_percent(job: &Job) -> u8 {
    if job.chunks.is_empty() {
        return 0;
    }
    let done = job
        .chunks
        .iter()
        .filter(|c| c.state == ChunkState::Done)
        .count();
    ((done * 100) / job.chunks.len()) as u8
}

/// Run a claimed job to a terminal state. The initial slot covers the
/// first chunk dispatched; further chunks acquire their own.
pub(crate) async fn run(ctx: Orchestrator, job: Job, initial_slot: SlotToken) {
    let job_id = job.id;
    let cancel = ctx.cancels.register(job_id);

    match drive(&ctx, job, initial_slot, &cancel).await {
        Ok(()) => {}
        Err(CoreError::StaleState { actual, .. }) => {
            tracing::debug!(job_id = %job_id, state = %actual, "Runner yielded to an external transition");
        }
        Err(cause) => fail_job(&ctx, job_id, cause).await,
    }

    ctx.cancels.remove(job_id);
    ctx.release_active(job_id);
}

/// Record a terminal failure for a job, from whatever non-terminal state
/// it is currently in. Used by the runner for its own failures and by the
/// scheduler for wiring errors.
pub(crate) async fn fail_job(ctx: &Orchestrator, job_id: JobId, cause: CoreError) {
    let phase = if matches!(cause, CoreError::Cancelled(_)) {
        ProgressPhase::Cancelled
    } else {
        ProgressPhase::Failed
    };
    let record = cause.to_job_error();

    // Re-evaluate against fresh state on CAS races, bounded.
    for _ in 0..4 {
        let job = match ctx.store.load(job_id).await {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(job_id = %job_id, %err, "Could not load job to record failure");
                return;
            }
        };
        if job.state.is_terminal() {
            // Another writer (external cancel, a racing reaper) already
            // recorded the outcome.
            return;
        }

        let error = record.clone();
        match ctx
            .store
            .transition(job_id, job.state, JobState::Failed, move |j| {
                j.error = Some(error);
            })
            .await
        {
            Ok(failed) => {
                tracing::warn!(job_id = %job_id, kind = ?record.kind, detail = %record.detail, "Job failed");
                ctx.progress
                    .publish(job_id, phase, completion_percent(&failed), Some(record.detail))
                    .await;
                return;
            }
            Err(CoreError::StaleState { .. }) => continue,
            Err(err) => {
                tracing::error!(job_id = %job_id, %err, "Could not record job failure");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Drive loop
// ---------------------------------------------------------------------------

enum WaveOutcome {
    /// Every dispatched chunk landed.
    Clean,
    /// At least one chunk failed transiently (and none fatally).
    Transient(String),
    /// A chunk failed in a way no retry can fix.
    Fatal(CoreError),
}

async fn drive(
    ctx: &Orchestrator,
    job: Job,
    initial_slot: SlotToken,
    cancel: &CancellationToken,
) -> Result<(), CoreError> {
    let mut slot = Some(initial_slot);

    let mut job = match job.state {
        JobState::Pending => plan(ctx, job).await?,
        // Requeued after a crash or restart; completed chunks are kept.
        JobState::Retrying => {
            let job = ctx
                .store
                .transition(job.id, JobState::Retrying, JobState::Running, |_| {})
                .await?;
            ctx.progress
                .publish(job.id, ProgressPhase::Running, completion_percent(&job), None)
                .await;
            job
        }
        other => {
            return Err(CoreError::Conflict(format!(
                "runner claimed job {} in state {other}",
                job.id
            )))
        }
    };

    loop {
        let pending: Vec<Chunk> = job
            .chunks
            .iter()
            .filter(|c| c.state != ChunkState::Done)
            .cloned()
            .collect();
        if pending.is_empty() {
            return finalize(ctx, job).await;
        }
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled("cancellation requested".into()));
        }

        let outcome = run_wave(ctx, &job, pending, slot.take(), cancel).await?;
        job = ctx.store.load(job.id).await?;
        match outcome {
            WaveOutcome::Clean => continue,
            WaveOutcome::Fatal(err) => return Err(err),
            WaveOutcome::Transient(detail) => {
                if job.state != JobState::Running {
                    return Err(CoreError::Cancelled(
                        "job left the running state mid-wave".into(),
                    ));
                }
                if !ctx.config.retry.budget_remaining(job.retry_count) {
                    return Err(CoreError::CapabilityTransient(format!(
                        "retry budget exhausted after {} retries: {detail}",
                        job.retry_count
                    )));
                }

                job = ctx
                    .store
                    .transition(job.id, JobState::Running, JobState::Retrying, |_| {})
                    .await?;
                ctx.progress
                    .publish(
                        job.id,
                        ProgressPhase::Retrying,
                        completion_percent(&job),
                        Some(detail),
                    )
                    .await;

                let delay = ctx.config.retry.delay_with_jitter(job.retry_count - 1);
                tracing::info!(job_id = %job.id, retry = job.retry_count, ?delay, "Backing off before retry");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CoreError::Cancelled("cancelled during backoff".into()));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                job = ctx
                    .store
                    .transition(job.id, JobState::Retrying, JobState::Running, |_| {})
                    .await?;
                ctx.progress
                    .publish(job.id, ProgressPhase::Running, completion_percent(&job), None)
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Resolve the source, plan the chunk windows, and move the job into
/// `Running` with its chunk records filled in. Failures here are terminal:
/// there is no retry edge out of `Chunking`.
async fn plan(ctx: &Orchestrator, job: Job) -> Result<Job, CoreError> {
    let job = ctx
        .store
        .transition(job.id, JobState::Pending, JobState::Chunking, |_| {})
        .await?;
    ctx.progress
        .publish(job.id, ProgressPhase::Chunking, 0, None)
        .await;

    let (source_ref, extent) = resolve_source(ctx, &job).await?;
    let windows = plan_chunks(job.kind, extent, &ctx.config.chunk_policy);
    tracing::info!(job_id = %job.id, kind = %job.kind, extent, chunks = windows.len(), "Chunk plan ready");

    let chunk_count = windows.len();
    let job = ctx
        .store
        .transition(job.id, JobState::Chunking, JobState::Running, move |j| {
            j.source_ref = source_ref;
            j.chunks = windows
                .iter()
                .enumerate()
                .map(|(i, range)| Chunk::new(i as u32, *range))
                .collect();
        })
        .await?;
    ctx.progress
        .publish(
            job.id,
            ProgressPhase::Running,
            0,
            Some(format!("{chunk_count} chunk(s) planned")),
        )
        .await;
    Ok(job)
}

/// Stage the job's media source and measure its extent.
async fn resolve_source(ctx: &Orchestrator, job: &Job) -> Result<(Option<String>, u64), CoreError> {
    match job.request.source() {
        // Voice cloning synthesizes from the request text itself.
        None => {
            let JobRequest::VoiceClone { text, .. } = &job.request else {
                return Err(CoreError::InputInvalid("request has no media source".into()));
            };
            Ok((None, text.chars().count() as u64))
        }
        Some(SourceInput::Blob { reference }) => {
            let bytes = ctx.blobs.get(reference).await.map_err(source_blob_err)?;
            Ok((Some(reference.clone()), bytes.len() as u64))
        }
        Some(SourceInput::Url { url }) => {
            let bytes = ctx.fetcher.fetch(url).await.map_err(|e| match e {
                FetchError::Permanent(msg) => CoreError::InputInvalid(msg),
                FetchError::Transient(msg) => CoreError::CapabilityTransient(msg),
            })?;
            let extent = bytes.len() as u64;
            let reference = ctx.blobs.put(bytes).await.map_err(storage_err)?;
            tracing::debug!(job_id = %job.id, url, extent, "Remote source staged");
            Ok((Some(reference), extent))
        }
    }
}

fn source_blob_err(e: StoreError) -> CoreError {
    match e {
        StoreError::NotFound { key } => {
            CoreError::InputInvalid(format!("source blob {key} not found"))
        }
        other => CoreError::Storage(other.to_string()),
    }
}

fn storage_err(e: StoreError) -> CoreError {
    CoreError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// Waves
// ---------------------------------------------------------------------------

/// Dispatch every pending chunk behind a pool slot and settle the wave.
///
/// Chunks are dispatched in sequence order but complete in any order;
/// completion order never affects the final result. A non-retryable
/// failure trips the wave token so in-flight siblings are abandoned
/// rather than finished for a job that is already lost.
async fn run_wave(
    ctx: &Orchestrator,
    job: &Job,
    mut pending: Vec<Chunk>,
    mut slot: Option<SlotToken>,
    cancel: &CancellationToken,
) -> Result<WaveOutcome, CoreError> {
    pending.sort_by_key(|c| c.sequence_index);
    let capability = Arc::clone(ctx.capabilities.get(job.kind)?);
    let pool = job.kind.pool();
    let wave_cancel = cancel.child_token();

    let mut tasks: JoinSet<(u32, Result<CapabilityOutput, CoreError>)> = JoinSet::new();
    for chunk in pending {
        let token = match slot.take() {
            Some(token) => token,
            None => acquire_slot(ctx, pool, cancel).await?,
        };

        ctx.store
            .update_chunk(job.id, JobState::Running, chunk.sequence_index, |c| {
                c.state = ChunkState::Running;
                c.attempts += 1;
            })
            .await?;

        let input = ChunkInput {
            sequence_index: chunk.sequence_index,
            source_ref: job.source_ref.clone(),
            range: chunk.range,
            request: job.request.clone(),
        };
        let capability = Arc::clone(&capability);
        let timeout = ctx.config.execution_timeout;
        let child = wave_cancel.child_token();
        tasks.spawn(async move {
            let result = executor::execute_chunk(capability, input, timeout, child).await;
            drop(token);
            (chunk.sequence_index, result)
        });
    }

    let mut transient: Option<String> = None;
    let mut fatal: Option<CoreError> = None;
    while let Some(joined) = tasks.join_next().await {
        let (sequence_index, result) =
            joined.map_err(|e| CoreError::Storage(format!("chunk task failed: {e}")))?;
        match result {
            Ok(output) => record_chunk_output(ctx, job, sequence_index, output).await?,
            Err(err) if err.is_retryable() => {
                tracing::warn!(job_id = %job.id, chunk = sequence_index, %err, "Chunk failed, will retry");
                mark_chunk_failed(ctx, job.id, sequence_index).await?;
                transient.get_or_insert(err.to_string());
            }
            // Abandoned by cancellation; the chunk itself did not fail.
            Err(err @ CoreError::Cancelled(_)) => {
                fatal.get_or_insert(err);
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, chunk = sequence_index, %err, "Chunk failed terminally");
                mark_chunk_failed(ctx, job.id, sequence_index).await?;
                wave_cancel.cancel();
                fatal.get_or_insert(err);
            }
        }
    }

    Ok(match (fatal, transient) {
        (Some(err), _) => WaveOutcome::Fatal(err),
        (None, Some(detail)) => WaveOutcome::Transient(detail),
        (None, None) => WaveOutcome::Clean,
    })
}

/// Wait for a slot in `pool`, yielding to cancellation. `Busy` is a
/// scheduling signal; an unknown pool is a wiring error.
async fn acquire_slot(
    ctx: &Orchestrator,
    pool: &str,
    cancel: &CancellationToken,
) -> Result<SlotToken, CoreError> {
    loop {
        match ctx.router.acquire(pool) {
            Ok(token) => return Ok(token),
            Err(AcquireError::Busy(_)) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CoreError::Cancelled(
                            "cancelled while waiting for a pool slot".into(),
                        ));
                    }
                    _ = tokio::time::sleep(SLOT_RETRY_INTERVAL) => {}
                }
            }
            Err(err @ AcquireError::UnknownPool(_)) => {
                return Err(CoreError::Storage(err.to_string()));
            }
        }
    }
}

/// Persist a chunk's artifact and mark it `Done`, then publish the new
/// completion percentage.
async fn record_chunk_output(
    ctx: &Orchestrator,
    job: &Job,
    sequence_index: u32,
    output: CapabilityOutput,
) -> Result<(), CoreError> {
    let artifact = ChunkArtifact {
        output_ref: output.output_ref,
        spans: output.spans,
    };
    let bytes = serde_json::to_vec(&artifact).map_err(|e| CoreError::Storage(e.to_string()))?;
    let artifact_ref = ctx.blobs.put(bytes).await.map_err(storage_err)?;

    let updated = ctx
        .store
        .update_chunk(job.id, JobState::Running, sequence_index, move |c| {
            c.state = ChunkState::Done;
            c.output_ref = Some(artifact_ref.clone());
        })
        .await?;
    ctx.progress
        .publish(
            job.id,
            ProgressPhase::Running,
            completion_percent(&updated),
            Some(format!("chunk {sequence_index} complete")),
        )
        .await;
    Ok(())
}

async fn mark_chunk_failed(
    ctx: &Orchestrator,
    job_id: JobId,
    sequence_index: u32,
) -> Result<(), CoreError> {
    ctx.store
        .update_chunk(job_id, JobState::Running, sequence_index, |c| {
            c.state = ChunkState::Failed;
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reassembly and completion
// ---------------------------------------------------------------------------

async fn finalize(ctx: &Orchestrator, job: Job) -> Result<(), CoreError> {
    let result_ref = assemble_result(ctx, &job).await?;
    ctx.store
        .transition(job.id, JobState::Running, JobState::Completed, {
            let result_ref = result_ref.clone();
            move |j| {
                j.result_ref = Some(result_ref);
            }
        })
        .await?;
    tracing::info!(job_id = %job.id, result_ref, "Job completed");
    ctx.progress
        .publish(job.id, ProgressPhase::Completed, 100, None)
        .await;
    Ok(())
}

/// Load every chunk artifact and produce the final result reference.
///
/// Unsplit jobs pass the capability artifact through; split jobs merge
/// the span sequences (overlap regions deduplicated, earlier chunk wins)
/// and store the merged result as a new blob. Missing outputs fail with
/// `IncompleteChunks` — partial data is never reassembled.
async fn assemble_result(ctx: &Orchestrator, job: &Job) -> Result<String, CoreError> {
    let mut artifacts: Vec<(u32, ChunkArtifact)> = Vec::with_capacity(job.chunks.len());
    let mut missing = Vec::new();
    for chunk in &job.chunks {
        match (&chunk.output_ref, chunk.state) {
            (Some(reference), ChunkState::Done) => {
                let bytes = ctx.blobs.get(reference).await.map_err(storage_err)?;
                let artifact: ChunkArtifact =
                    serde_json::from_slice(&bytes).map_err(|e| CoreError::Storage(e.to_string()))?;
                artifacts.push((chunk.sequence_index, artifact));
            }
            _ => missing.push(chunk.sequence_index),
        }
    }
    if !missing.is_empty() {
        return Err(CoreError::IncompleteChunks { missing });
    }

    if let [(_, artifact)] = artifacts.as_slice() {
        return Ok(artifact.output_ref.clone());
    }

    let outputs: Vec<ChunkOutput> = artifacts
        .into_iter()
        .map(|(sequence_index, artifact)| ChunkOutput {
            sequence_index,
            spans: artifact.spans,
        })
        .collect();
    let merged = reassemble(job.chunks.len() as u32, outputs)?;
    let bytes = serde_json::to_vec(&merged).map_err(|e| CoreError::Storage(e.to_string()))?;
    ctx.blobs.put(bytes).await.map_err(storage_err)
}
