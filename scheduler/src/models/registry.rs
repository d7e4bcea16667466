//! Registry of model descriptors.

use std::collections::{HashMap, HashSet};

use infergate_common::ModelDescriptor;

use crate::config::Config;
use crate::error::{Result, SchedulerError};

/// Static metadata for every logical model the scheduler serves.
///
/// Built once at startup and immutable afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Build a registry, rejecting any invalid descriptor.
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Result<Self> {
        let mut models = HashMap::new();
        for descriptor in descriptors {
            Self::validate_descriptor(&descriptor)?;
            let id = descriptor.model_id.clone();
            if models.insert(id.clone(), descriptor).is_some() {
                return Err(SchedulerError::configuration(format!(
                    "model '{}' is declared twice",
                    id
                )));
            }
        }

        let registry = Self { models };
        registry.validate_variants()?;
        Ok(registry)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.descriptors())
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(model_id)
    }

    /// Look up a model, treating an unknown id as a malformed request.
    pub fn require(&self, model_id: &str) -> Result<&ModelDescriptor> {
        self.get(model_id)
            .ok_or_else(|| SchedulerError::validation(format!("unknown model '{}'", model_id)))
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// All descriptors, sorted by model id.
    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        let mut all: Vec<_> = self.models.values().cloned().collect();
        all.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        all
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn validate_descriptor(d: &ModelDescriptor) -> Result<()> {
        let fail = |reason: String| {
            Err(SchedulerError::configuration(format!(
                "model '{}': {}",
                d.model_id, reason
            )))
        };

        if d.model_id.is_empty() {
            return fail("model id must not be empty".to_string());
        }
        if d.backend_compatibility.is_empty() {
            return fail("backend_compatibility must list at least one backend".to_string());
        }
        if d.preferred_batch_size == 0 {
            return fail("preferred_batch_size must be at least 1".to_string());
        }
        if d.preferred_batch_size > d.max_batch_size {
            return fail(format!(
                "preferred_batch_size ({}) exceeds max_batch_size ({})",
                d.preferred_batch_size, d.max_batch_size
            ));
        }
        if d.accelerator_batch_limit == 0 {
            return fail("accelerator_batch_limit must be at least 1".to_string());
        }
        if d.max_wait_ms == 0 {
            return fail("max_wait_ms must be greater than zero".to_string());
        }
        if d.memory_footprint == 0 {
            return fail("memory_footprint must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Every `smaller_variant` must exist, and variant chains must not loop.
    fn validate_variants(&self) -> Result<()> {
        for start in self.models.values() {
            let mut seen = HashSet::from([start.model_id.as_str()]);
            let mut current = start;
            while let Some(variant) = current.smaller_variant.as_deref() {
                let next = self.get(variant).ok_or_else(|| {
                    SchedulerError::configuration(format!(
                        "model '{}' names unknown smaller_variant '{}'",
                        current.model_id, variant
                    ))
                })?;
                if !seen.insert(variant) {
                    return Err(SchedulerError::configuration(format!(
                        "smaller_variant chain starting at '{}' loops back to '{}'",
                        start.model_id, variant
                    )));
                }
                current = next;
            }
        }
        Ok(())
    }
}
