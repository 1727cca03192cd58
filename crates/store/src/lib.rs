//! Durable storage for the orchestrator.
//!
//! Metadata lives behind [`MetaStore`], a versioned key-value interface
//! with compare-and-swap; media bytes live behind [`BlobStore`]. The
//! [`JobStore`] repository layers the job state machine on top of the
//! key-value CAS so that concurrent schedulers and executors can never
//! both apply a transition from the same prior state.

pub mod blob;
pub mod jobs;
pub mod meta;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use jobs::{JobListQuery, JobStore, DEFAULT_LIMIT, MAX_LIMIT};
pub use meta::{MemoryMetaStore, MetaStore, StoreError, VersionedValue};
