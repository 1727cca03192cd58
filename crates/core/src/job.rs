//! Job and chunk domain model.
//!
//! A [`Job`] is the unit of orchestrated work; a [`Chunk`] is a bounded
//! slice of its input processed independently. Both records round-trip
//! losslessly through serde_json so the metadata store never reinterprets
//! `state` or `sequence_index` values.

use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Resource pools
// ---------------------------------------------------------------------------

/// GPU-affine pool: synthesis and speaker models saturate the accelerator.
pub const POOL_GPU: &str = "gpu";

/// CPU-affine pool: translation/transcription runs on CPU workers.
pub const POOL_CPU: &str = "cpu";

// ---------------------------------------------------------------------------
// Job kind
// ---------------------------------------------------------------------------

/// The four orchestrated media transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    VoiceClone,
    Translate,
    Diarize,
    ExtractSpeakers,
}

impl JobKind {
    /// Stable string form, used in logs and list filters.
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::VoiceClone => "voice_clone",
            JobKind::Translate => "translate",
            JobKind::Diarize => "diarize",
            JobKind::ExtractSpeakers => "extract_speakers",
        }
    }

    /// Static kind → pool mapping. Voice and speaker models are GPU-bound;
    /// translation runs on the CPU pool. These are distinct physical
    /// resource classes with independent saturation behaviour.
    pub fn pool(self) -> &'static str {
        match self {
            JobKind::VoiceClone | JobKind::Diarize | JobKind::ExtractSpeakers => POOL_GPU,
            JobKind::Translate => POOL_CPU,
        }
    }

    /// Voice cloning is driven by bounded text, not media size, so it is
    /// never split.
    pub fn chunking_eligible(self) -> bool {
        !matches!(self, JobKind::VoiceClone)
    }

    /// Diarization and translation windows overlap at boundaries to avoid
    /// cutting mid-utterance.
    pub fn overlapping_windows(self) -> bool {
        matches!(self, JobKind::Diarize | JobKind::Translate)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source input
// ---------------------------------------------------------------------------

/// Where a job's media input comes from: an already-stored blob, or a
/// remote URL resolved by the fetch collaborator before chunk planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceInput {
    Blob { reference: String },
    Url { url: String },
}

// ---------------------------------------------------------------------------
// Job request (type-specific parameters)
// ---------------------------------------------------------------------------

/// Tagged job request carrying the per-kind parameters. Forwarded opaquely
/// to the capability beyond what admission validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRequest {
    VoiceClone {
        voice_profile_id: String,
        text: String,
        language: String,
        #[serde(default = "default_speed")]
        speed: f32,
    },
    Translate {
        source: SourceInput,
        target_language: String,
        #[serde(default)]
        source_language: Option<String>,
    },
    Diarize {
        source: SourceInput,
        #[serde(default)]
        speaker_count_hint: Option<u8>,
    },
    ExtractSpeakers {
        source: SourceInput,
        #[serde(default)]
        min_speakers: Option<u8>,
    },
}

fn default_speed() -> f32 {
    1.0
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::VoiceClone { .. } => JobKind::VoiceClone,
            JobRequest::Translate { .. } => JobKind::Translate,
            JobRequest::Diarize { .. } => JobKind::Diarize,
            JobRequest::ExtractSpeakers { .. } => JobKind::ExtractSpeakers,
        }
    }

    /// The media source, if this kind has one (voice cloning does not).
    pub fn source(&self) -> Option<&SourceInput> {
        match self {
            JobRequest::VoiceClone { .. } => None,
            JobRequest::Translate { source, .. }
            | JobRequest::Diarize { source, .. }
            | JobRequest::ExtractSpeakers { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Job lifecycle states. Transitions form a strictly forward path with
/// `Retrying → Running` as the only backward-looking edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Chunking,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Legality of a single state-machine edge. Every store transition is
    /// CAS-guarded *and* checked against this table.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Chunking)
                | (Pending, Running)
                | (Pending, Failed)
                | (Chunking, Running)
                | (Chunking, Failed)
                | (Running, Completed)
                | (Running, Retrying)
                | (Running, Failed)
                | (Retrying, Running)
                | (Retrying, Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Chunking => "chunking",
            JobState::Running => "running",
            JobState::Retrying => "retrying",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Chunk lifecycle, independent of sibling chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Running,
    Done,
    Failed,
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Half-open slice `[start, end)` of the source input. The unit (bytes or
/// milliseconds) is fixed by the source media and carried alongside it;
/// the orchestrator only ever compares and orders these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: u64,
    pub end: u64,
}

impl SliceRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A bounded slice of a job's input, owned exclusively by its parent job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position; defines reassembly order.
    pub sequence_index: u32,
    pub range: SliceRange,
    pub state: ChunkState,
    /// Execution attempts so far (1 on first dispatch).
    pub attempts: u32,
    /// Populated only once `state` is `Done`.
    pub output_ref: Option<String>,
}

impl Chunk {
    pub fn new(sequence_index: u32, range: SliceRange) -> Self {
        Self {
            sequence_index,
            range,
            state: ChunkState::Pending,
            attempts: 0,
            output_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Durable job record: the single source of truth for orchestration state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub request: JobRequest,
    pub state: JobState,
    /// Incremented only on the `Running → Retrying` transition.
    pub retry_count: u32,
    /// Ordered chunk records; a single entry when the input was not split.
    pub chunks: Vec<Chunk>,
    /// Resolved source media in the blob store, recorded during chunk
    /// planning. `None` for voice cloning, which synthesizes from text.
    #[serde(default)]
    pub source_ref: Option<String>,
    pub created_at: Timestamp,
    /// Last write to this record; the liveness window is measured from it.
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    /// Set exactly once, on `Completed` or `Failed`.
    pub completed_at: Option<Timestamp>,
    /// Exactly one of `result_ref` / `error` is populated on a terminal job.
    pub result_ref: Option<String>,
    pub error: Option<JobError>,
}

impl Job {
    /// A freshly admitted job in `Pending` with no chunks planned yet.
    pub fn admit(id: JobId, request: JobRequest, now: Timestamp) -> Self {
        Self {
            id,
            kind: request.kind(),
            request,
            state: JobState::Pending,
            retry_count: 0,
            chunks: Vec::new(),
            source_ref: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result_ref: None,
            error: None,
        }
    }

    /// All chunks reported `Done`. Vacuously false before planning.
    pub fn all_chunks_done(&self) -> bool {
        !self.chunks.is_empty()
            && self
                .chunks
                .iter()
                .all(|c| c.state == ChunkState::Done)
    }

    pub fn chunk(&self, sequence_index: u32) -> Option<&Chunk> {
        self.chunks
            .iter()
            .find(|c| c.sequence_index == sequence_index)
    }

    pub fn chunk_mut(&mut self, sequence_index: u32) -> Option<&mut Chunk> {
        self.chunks
            .iter_mut()
            .find(|c| c.sequence_index == sequence_index)
    }
}
