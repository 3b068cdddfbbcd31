//! Copy-on-write capability registry.
//!
//! Reads clone an `Arc` snapshot under a briefly held read lock and then work
//! lock-free. Writes build a new snapshot and swap it in, so a reader never
//! observes a half-applied registration.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use strata_core::{Capability, ValidationError};

use crate::executor::CapabilityExecutor;

#[derive(Clone, Default)]
struct Snapshot {
    capabilities: HashMap<String, Arc<Capability>>,
    executors: HashMap<String, Arc<dyn CapabilityExecutor>>,
}

/// Maps capability names to their declarations and agents to executors.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Arc<Snapshot>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capability_names())
            .field("agents", &self.agent_ids())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, apply: impl FnOnce(&mut Snapshot)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Snapshot::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }

    /// Insert or replace a capability by name.
    pub fn register(&self, capability: Capability) -> Result<(), ValidationError> {
        validate_capability(&capability)?;
        tracing::info!(
            capability = %capability.name,
            agent_id = %capability.owner_agent_id,
            required_permission = %capability.required_permission,
            "Registered capability"
        );
        self.update(|snap| {
            snap.capabilities
                .insert(capability.name.clone(), Arc::new(capability));
        });
        Ok(())
    }

    /// Register an executor and every capability it declares, in one swap.
    ///
    /// Declared capabilities must name this executor's agent as owner.
    /// Returns the number of capabilities registered.
    pub fn register_agent(&self, executor: Arc<dyn CapabilityExecutor>) -> Result<usize, ValidationError> {
        let agent_id = executor.agent_id().to_string();
        if agent_id.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "agent_id".to_string(),
            });
        }

        let declared = executor.capabilities();
        for capability in &declared {
            validate_capability(capability)?;
            if capability.owner_agent_id != agent_id {
                return Err(ValidationError::InvalidValue {
                    field: "owner_agent_id".to_string(),
                    reason: format!(
                        "capability {} is owned by {}, not {}",
                        capability.name, capability.owner_agent_id, agent_id
                    ),
                });
            }
        }

        let count = declared.len();
        self.update(|snap| {
            snap.executors.insert(agent_id.clone(), executor);
            for capability in declared {
                snap.capabilities
                    .insert(capability.name.clone(), Arc::new(capability));
            }
        });
        tracing::info!(agent_id = %agent_id, capabilities = count, "Registered agent");
        Ok(count)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<Capability>> {
        self.snapshot().capabilities.get(name).cloned()
    }

    pub fn executor(&self, agent_id: &str) -> Option<Arc<dyn CapabilityExecutor>> {
        self.snapshot().executors.get(agent_id).cloned()
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.update(|snap| removed = snap.capabilities.remove(name).is_some());
        removed
    }

    /// Registered capability names, sorted.
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered agent ids, sorted.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().executors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.snapshot().capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_capability(capability: &Capability) -> Result<(), ValidationError> {
    if capability.name.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
    }
    if capability.owner_agent_id.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "owner_agent_id".to_string(),
        });
    }
    Ok(())
}
