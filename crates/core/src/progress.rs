//! Progress events: ordered, replayable facts about a job's execution,
//! distinct from its durable state record.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Push message type constants
// ---------------------------------------------------------------------------
// Used by the WebSocket layer when forwarding events to subscribers.

/// Progress update during execution (phase + percent).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with a terminal error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled (by user, operator, or the stale-job reaper).
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Execution phase reported in a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Queued,
    Chunking,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressPhase {
    /// Terminal phases end a job's progress stream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressPhase::Completed | ProgressPhase::Failed | ProgressPhase::Cancelled
        )
    }

    /// Push message type for this phase.
    pub fn message_type(self) -> &'static str {
        match self {
            ProgressPhase::Completed => MSG_TYPE_JOB_COMPLETED,
            ProgressPhase::Failed => MSG_TYPE_JOB_FAILED,
            ProgressPhase::Cancelled => MSG_TYPE_JOB_CANCELLED,
            _ => MSG_TYPE_JOB_PROGRESS,
        }
    }
}

/// An immutable, append-only progress fact. `sequence_number` is strictly
/// increasing per job; consumers use it to detect gaps and duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub sequence_number: u64,
    pub phase: ProgressPhase,
    /// 0–100 overall completion estimate.
    pub percent: u8,
    pub detail: Option<String>,
    pub emitted_at: Timestamp,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(ProgressPhase::Completed.is_terminal());
        assert!(ProgressPhase::Failed.is_terminal());
        assert!(ProgressPhase::Cancelled.is_terminal());
        assert!(!ProgressPhase::Running.is_terminal());
        assert!(!ProgressPhase::Retrying.is_terminal());
    }

    #[test]
    fn message_types_match_phase() {
        assert_eq!(ProgressPhase::Running.message_type(), MSG_TYPE_JOB_PROGRESS);
        assert_eq!(
            ProgressPhase::Completed.message_type(),
            MSG_TYPE_JOB_COMPLETED
        );
        assert_eq!(ProgressPhase::Failed.message_type(), MSG_TYPE_JOB_FAILED);
        assert_eq!(
            ProgressPhase::Cancelled.message_type(),
            MSG_TYPE_JOB_CANCELLED
        );
    }
}
