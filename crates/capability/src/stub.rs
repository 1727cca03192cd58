//! Scripted stub capability for orchestration tests.
//!
//! Lets a test declare, per chunk and per attempt, what the "engine"
//! does: succeed, fail transiently, fail permanently, or hang until the
//! execution timeout fires. Also records peak concurrent invocations so
//! resource-accounting properties can be asserted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use voxflow_core::chunking::Span;

use crate::{Capability, CapabilityError, CapabilityOutput, ChunkInput};

/// What the stub does for one (chunk, attempt) pair.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed,
    FailTransient(&'static str),
    FailPermanent(&'static str),
    /// Never return; the executor's timeout must fire.
    Hang,
}

/// Scripted external capability.
pub struct StubCapability {
    name: &'static str,
    affinity: &'static str,
    /// Per-sequence-index outcome script, consumed one entry per attempt.
    /// Indices without a script always succeed.
    script: Mutex<HashMap<u32, Vec<ScriptedOutcome>>>,
    /// Attempts observed per sequence index.
    attempts: Mutex<HashMap<u32, u32>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubCapability {
    /// A stub that succeeds on every invocation.
    pub fn succeeding(name: &'static str, affinity: &'static str) -> Self {
        Self::scripted(name, affinity, HashMap::new())
    }

    /// A stub following `script`; attempts beyond a chunk's script succeed.
    pub fn scripted(
        name: &'static str,
        affinity: &'static str,
        script: HashMap<u32, Vec<ScriptedOutcome>>,
    ) -> Self {
        Self {
            name,
            affinity,
            script: Mutex::new(script),
            attempts: Mutex::new(HashMap::new()),
            latency: Duration::from_millis(1),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add synthetic per-invocation latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Attempts observed for a sequence index.
    pub fn attempts_for(&self, sequence_index: u32) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&sequence_index)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of invocations ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, sequence_index: u32) -> ScriptedOutcome {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(sequence_index).or_insert(0);
            *counter += 1;
            *counter - 1
        };
        let script = self.script.lock().unwrap();
        script
            .get(&sequence_index)
            .and_then(|outcomes| outcomes.get(attempt as usize).cloned())
            .unwrap_or(ScriptedOutcome::Succeed)
    }
}

#[async_trait]
impl Capability for StubCapability {
    fn name(&self) -> &'static str {
        self.name
    }

    fn affinity(&self) -> &'static str {
        self.affinity
    }

    async fn submit(&self, input: ChunkInput) -> Result<CapabilityOutput, CapabilityError> {
        // Drop guard so a timed-out (dropped) invocation still decrements.
        let _guard = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);

        let outcome = self.next_outcome(input.sequence_index);
        tokio::time::sleep(self.latency).await;

        match outcome {
            ScriptedOutcome::Succeed => Ok(CapabilityOutput {
                output_ref: format!("{}-out-{}", self.name, input.sequence_index),
                spans: vec![Span {
                    start: input.range.start,
                    end: input.range.end,
                    payload: serde_json::json!(format!(
                        "{}:{}..{}",
                        self.name, input.range.start, input.range.end
                    )),
                }],
            }),
            ScriptedOutcome::FailTransient(msg) => Err(CapabilityError::transient(msg)),
            ScriptedOutcome::FailPermanent(msg) => Err(CapabilityError::input_invalid(msg)),
            ScriptedOutcome::Hang => {
                // Far longer than any test's execution timeout.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hung invocation should have been timed out");
            }
        }
    }
}

struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
