//! Single-chunk execution: one capability invocation bounded by the
//! execution timeout and a cancellation token.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use voxflow_capability::{Capability, CapabilityOutput, ChunkInput};
use voxflow_core::chunking::Span;
use voxflow_core::error::CoreError;

/// Persisted output of one completed chunk: the capability's artifact
/// reference plus its timestamped spans. Stored as a blob and referenced
/// from the chunk record so reassembly survives a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChunkArtifact {
    pub output_ref: String,
    pub spans: Vec<Span>,
}

/// Run one chunk to completion, timeout, or cancellation.
///
/// A timeout abandons the invocation and counts as a transient failure;
/// cancellation maps to `Cancelled`. Capability errors follow their own
/// retryability classification.
pub(crate) async fn execute_chunk(
    capability: Arc<dyn Capability>,
    input: ChunkInput,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<CapabilityOutput, CoreError> {
    let sequence_index = input.sequence_index;
    tokio::select! {
        _ = cancel.cancelled() => Err(CoreError::Cancelled(format!(
            "chunk {sequence_index} abandoned"
        ))),
        result = tokio::time::timeout(timeout, capability.submit(input)) => match result {
            Err(_) => Err(CoreError::CapabilityTransient(format!(
                "chunk {sequence_index} timed out after {timeout:?}"
            ))),
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.retryable => Err(CoreError::CapabilityTransient(e.message)),
            Ok(Err(e)) => Err(CoreError::InputInvalid(e.message)),
        },
    }
}
