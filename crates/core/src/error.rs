//! Error taxonomy for the orchestration core.
//!
//! The taxonomy drives control flow: `CapabilityTransient` is the only kind
//! the scheduler retries; everything else escalates straight to a terminal
//! `FAILED`. `ResourceBusy` and `StaleState` are scheduling signals rather
//! than job outcomes — they never appear in a persisted job record.

use serde::{Deserialize, Serialize};

use crate::job::JobState;
use crate::types::JobId;

/// Terminal failure classification persisted on a failed job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input can never be processed as submitted (bad format,
    /// unsupported language, oversized text). Not retryable.
    InputInvalid,
    /// The capability failed in a way that may succeed on retry
    /// (timeout, transient resource exhaustion).
    CapabilityTransient,
    /// Reassembly was attempted with one or more chunk outputs missing.
    IncompleteChunks,
    /// The job was cancelled by a user, operator, or the stale-job reaper.
    Cancelled,
    /// The metadata store itself failed.
    Storage,
}

/// The terminal cause recorded on a `FAILED` job.
///
/// Always the *last* cause, never a history of attempts (attempt history
/// goes to the logs, not the job record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Domain-level error used across the orchestrator crates.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Non-retryable input problem, caught at admission or by a capability.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// Retryable capability failure (timeout, transient exhaustion).
    #[error("transient capability failure: {0}")]
    CapabilityTransient(String),

    /// Reassembly precondition violation: outputs missing for the listed
    /// sequence indices.
    #[error("incomplete chunks: missing outputs for indices {missing:?}")]
    IncompleteChunks { missing: Vec<u32> },

    /// Cancellation requested while the job was still cancellable.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A CAS transition lost the race: the job was not in the expected
    /// state. The loser reloads and re-evaluates; never surfaced to callers.
    #[error("stale state on job {job_id}: expected {expected:?}, found {actual:?}")]
    StaleState {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },

    /// Metadata or blob store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Lookup miss.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Request conflicts with the job's current lifecycle position
    /// (e.g. cancelling a terminal job or one already in reassembly).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    /// Whether the scheduler should retry work that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::CapabilityTransient(_))
    }

    /// Map to the terminal kind recorded on a failed job, if this error
    /// is a terminal cause at all.
    pub fn terminal_kind(&self) -> Option<ErrorKind> {
        match self {
            CoreError::InputInvalid(_) => Some(ErrorKind::InputInvalid),
            CoreError::CapabilityTransient(_) => Some(ErrorKind::CapabilityTransient),
            CoreError::IncompleteChunks { .. } => Some(ErrorKind::IncompleteChunks),
            CoreError::Cancelled(_) => Some(ErrorKind::Cancelled),
            CoreError::Storage(_) => Some(ErrorKind::Storage),
            CoreError::StaleState { .. } | CoreError::NotFound { .. } | CoreError::Conflict(_) => {
                None
            }
        }
    }

    /// Build the persisted record for a terminal failure.
    pub fn to_job_error(&self) -> JobError {
        JobError::new(
            self.terminal_kind().unwrap_or(ErrorKind::Storage),
            self.to_string(),
        )
    }
}
