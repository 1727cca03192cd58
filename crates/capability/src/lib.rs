//! External inference capability boundary.
//!
//! The inference engines themselves (voice synthesis, speech recognition,
//! diarization) are opaque external collaborators consumed as
//! `submit(input) -> result | failure` with a declared resource affinity.
//! This crate defines that seam, the static job-kind → capability table,
//! and the URL-fetch collaborator for remote-sourced inputs.

pub mod fetcher;
pub mod registry;
pub mod remote;
pub mod stub;

use async_trait::async_trait;
use voxflow_core::chunking::Span;
use voxflow_core::job::{JobRequest, SliceRange};

pub use fetcher::{FetchError, HttpMediaFetcher, MediaFetcher};
pub use registry::CapabilityRegistry;
pub use remote::RemoteCapability;
pub use stub::{ScriptedOutcome, StubCapability};

/// The slice of input handed to a capability for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    /// Position of this chunk within its job.
    pub sequence_index: u32,
    /// Blob reference of the (already fetched) source media, if any.
    pub source_ref: Option<String>,
    /// The slice of the source this invocation covers.
    pub range: SliceRange,
    /// The full job request; type-specific parameters (language, voice
    /// profile, speaker hints) are forwarded opaquely.
    pub request: JobRequest,
}

/// Successful capability output for one chunk.
#[derive(Debug, Clone)]
pub struct CapabilityOutput {
    /// Blob reference of the produced artifact slice.
    pub output_ref: String,
    /// Timestamped spans for kinds whose outputs are merged span-wise
    /// (transcripts, speaker turns). Empty for pure-audio outputs.
    pub spans: Vec<Span>,
}

/// Capability failure with an explicit retryability classification.
///
/// Anything the capability does not explicitly classify as input-invalid
/// is treated as retryable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
    pub retryable: bool,
}

impl CapabilityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// An external inference engine, consumed as an opaque capability.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Name used in logs and the registry.
    fn name(&self) -> &'static str;

    /// Declared resource affinity: the pool this capability saturates.
    fn affinity(&self) -> &'static str;

    /// Rough relative cost of one invocation, used as an estimation hint.
    fn cost_hint(&self) -> u32 {
        1
    }

    /// Run one chunk (or one whole unsplit job) to completion.
    async fn submit(&self, input: ChunkInput) -> Result<CapabilityOutput, CapabilityError>;
}

impl std::fmt::Debug for dyn Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name())
            .field("affinity", &self.affinity())
            .finish()
    }
}
