//! Static job-kind → capability dispatch table.
//!
//! Dispatch is a fixed table filled at startup, not virtual discovery:
//! each kind maps to exactly one capability, and the capability's
//! declared affinity must agree with the kind's static pool mapping.

use std::collections::HashMap;
use std::sync::Arc;

use voxflow_core::error::CoreError;
use voxflow_core::job::JobKind;

use crate::Capability;

/// Immutable kind → capability table.
#[derive(Debug)]
pub struct CapabilityRegistry {
    table: HashMap<JobKind, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Build the table. Fails fast if a capability's declared affinity
    /// disagrees with the kind's pool, or a kind is registered twice.
    pub fn build(
        entries: impl IntoIterator<Item = (JobKind, Arc<dyn Capability>)>,
    ) -> Result<Self, CoreError> {
        let mut table: HashMap<JobKind, Arc<dyn Capability>> = HashMap::new();
        for (kind, capability) in entries {
            if capability.affinity() != kind.pool() {
                return Err(CoreError::Conflict(format!(
                    "capability \"{}\" declares affinity \"{}\" but kind {kind} maps to pool \"{}\"",
                    capability.name(),
                    capability.affinity(),
                    kind.pool()
                )));
            }
            if table.insert(kind, capability).is_some() {
                return Err(CoreError::Conflict(format!(
                    "kind {kind} registered twice"
                )));
            }
        }
        Ok(Self { table })
    }

    /// Look up the capability for a job kind.
    pub fn get(&self, kind: JobKind) -> Result<&Arc<dyn Capability>, CoreError> {
        self.table.get(&kind).ok_or_else(|| CoreError::NotFound {
            entity: "Capability",
            id: kind.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubCapability;

    #[test]
    fn registry_rejects_affinity_mismatch() {
        // Translate maps to the CPU pool; a GPU-affine capability is a
        // wiring mistake.
        let gpu_stub: Arc<dyn Capability> =
            Arc::new(StubCapability::succeeding("bad-wiring", "gpu"));
        let err = CapabilityRegistry::build([(JobKind::Translate, gpu_stub)]).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn registry_rejects_duplicate_kind() {
        let a: Arc<dyn Capability> = Arc::new(StubCapability::succeeding("a", "cpu"));
        let b: Arc<dyn Capability> = Arc::new(StubCapability::succeeding("b", "cpu"));
        let err =
            CapabilityRegistry::build([(JobKind::Translate, a), (JobKind::Translate, b)])
                .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn lookup_misses_are_not_found() {
        let registry = CapabilityRegistry::build([]).unwrap();
        assert!(matches!(
            registry.get(JobKind::Diarize).unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }
}
