//! Voxflow domain core: job/chunk model, state machine, chunking engine,
//! retry policy, and error taxonomy.
//!
//! This crate is pure — no I/O, no async runtime — so every rule the
//! orchestrator enforces (legal state transitions, chunk window planning,
//! overlap deduplication, backoff schedules) can be tested in isolation.

pub mod chunking;
pub mod error;
pub mod job;
pub mod progress;
pub mod retry;
pub mod types;
pub mod validate;

pub use error::{CoreError, ErrorKind, JobError};
pub use job::{Chunk, ChunkState, Job, JobKind, JobRequest, JobState, SliceRange, SourceInput};
pub use progress::{ProgressEvent, ProgressPhase};
pub use retry::RetryPolicy;
