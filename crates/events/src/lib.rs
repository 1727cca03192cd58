//! Per-job progress channel.
//!
//! [`ProgressChannel`] delivers ordered, at-least-once [`ProgressEvent`]s
//! to any currently subscribed observer, decoupled from the job store
//! write path: publishing never blocks and never fails. Events are
//! retained in a bounded per-job buffer so a subscriber that (re)connects
//! receives everything from its last acknowledged sequence number onward;
//! the stream is finite and ends after the job's terminal event.

pub mod channel;

pub use channel::{ProgressChannel, DEFAULT_RETENTION};
