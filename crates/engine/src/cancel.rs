//! Per-job cancellation token registry.
//!
//! Cancellation is cooperative: cancelling a job trips its token, and
//! in-flight chunk executors abandon work at their next checkpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use voxflow_core::types::JobId;

#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a job about to run. Returns the token the
    /// job runner and its executors should watch.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .insert(job_id, token.clone());
        token
    }

    /// Trip a job's token. Returns false if the job has no active runner.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let tokens = self.tokens.lock().expect("cancel registry poisoned");
        match tokens.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a finished job's token.
    pub fn remove(&self, job_id: JobId) {
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_trips_only_the_registered_token() {
        let registry = CancelRegistry::new();
        let a = voxflow_core::types::new_job_id();
        let b = voxflow_core::types::new_job_id();

        let token_a = registry.register(a);
        let token_b = registry.register(b);

        assert!(registry.cancel(a));
        assert!(token_a.is_cancelled());
        assert!(!token_b.is_cancelled());

        registry.remove(b);
        assert!(!registry.cancel(b));
    }
}
