//! HTTP-backed capability: an external inference engine reachable over a
//! JSON submit endpoint.
//!
//! The engine receives the chunk slice and the job's type-specific
//! parameters and answers with an artifact reference plus optional
//! timestamped spans. Transport failures and 5xx responses are transient;
//! 4xx means the engine can never process this input.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use voxflow_core::chunking::Span;
use voxflow_core::job::{JobRequest, SliceRange};

use crate::{Capability, CapabilityError, CapabilityOutput, ChunkInput};

/// Wire request for one chunk submission.
#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    sequence_index: u32,
    source_ref: Option<&'a str>,
    range: SliceRange,
    #[serde(flatten)]
    request: &'a JobRequest,
}

/// Wire response from the engine.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    output_ref: String,
    #[serde(default)]
    spans: Vec<Span>,
}

/// A remote inference engine invoked over HTTP.
pub struct RemoteCapability {
    name: &'static str,
    affinity: &'static str,
    submit_url: String,
    client: reqwest::Client,
}

impl RemoteCapability {
    /// `base_url` is the engine root; submissions POST to `{base_url}/submit`.
    pub fn new(
        name: &'static str,
        affinity: &'static str,
        base_url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, CapabilityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::input_invalid(e.to_string()))?;
        Ok(Self {
            name,
            affinity,
            submit_url: format!("{}/submit", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl Capability for RemoteCapability {
    fn name(&self) -> &'static str {
        self.name
    }

    fn affinity(&self) -> &'static str {
        self.affinity
    }

    async fn submit(&self, input: ChunkInput) -> Result<CapabilityOutput, CapabilityError> {
        let payload = SubmitRequest {
            sequence_index: input.sequence_index,
            source_ref: input.source_ref.as_deref(),
            range: input.range,
            request: &input.request,
        };

        let response = self
            .client
            .post(&self.submit_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CapabilityError::transient(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CapabilityError::input_invalid(format!(
                "{} rejected chunk {}: {status} {detail}",
                self.name, input.sequence_index
            )));
        }
        if !status.is_success() {
            return Err(CapabilityError::transient(format!(
                "{} responded {status} for chunk {}",
                self.name, input.sequence_index
            )));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::transient(e.to_string()))?;
        tracing::debug!(
            capability = self.name,
            chunk = input.sequence_index,
            output_ref = %body.output_ref,
            "Chunk submission accepted"
        );
        Ok(CapabilityOutput {
            output_ref: body.output_ref,
            spans: body.spans,
        })
    }
}
