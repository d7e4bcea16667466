//! Backend classes and model descriptors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Capability, RequestKind};

/// Class of compute backend a batch executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Fast, capacity-limited accelerator (e.g. an NPU).
    Accelerator,
    /// Slower, elastic general-purpose processor.
    General,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Accelerator => "accelerator",
            Backend::General => "general",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static metadata for a logical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    #[serde(default)]
    pub capability_tags: Vec<Capability>,
    /// Resident memory in bytes once loaded.
    pub memory_footprint: u64,
    pub preferred_batch_size: usize,
    pub max_batch_size: usize,
    /// Batch window: longest time an open batch waits before sealing.
    pub max_wait_ms: u64,
    pub backend_compatibility: Vec<Backend>,
    #[serde(default)]
    pub smaller_variant: Option<String>,
    /// Largest batch the accelerator is preferred for (crossover point).
    pub accelerator_batch_limit: usize,
}

impl ModelDescriptor {
    pub fn supports(&self, backend: Backend) -> bool {
        self.backend_compatibility.contains(&backend)
    }

    /// Whether this model provides every capability in `required`.
    pub fn provides_all(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capability_tags.contains(c))
    }

    /// Whether this model can serve requests of the given kind.
    pub fn serves(&self, kind: RequestKind) -> bool {
        let needed = match kind {
            RequestKind::Embedding => Capability::Embeddings,
            RequestKind::Generation => Capability::TextGeneration,
        };
        self.capability_tags.contains(&needed)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor {
            model_id: "minilm".to_string(),
            capability_tags: vec![Capability::Embeddings, Capability::Multilingual],
            memory_footprint: 90 * 1024 * 1024,
            preferred_batch_size: 4,
            max_batch_size: 8,
            max_wait_ms: 20,
            backend_compatibility: vec![Backend::Accelerator, Backend::General],
            smaller_variant: None,
            accelerator_batch_limit: 3,
        }
    }

    #[test]
    fn test_supports_and_serves() {
        let d = descriptor();
        assert!(d.supports(Backend::Accelerator));
        assert!(d.serves(RequestKind::Embedding));
        assert!(!d.serves(RequestKind::Generation));
        assert_eq!(d.batch_window(), Duration::from_millis(20));
    }

    #[test]
    fn test_provides_all() {
        let d = descriptor();
        assert!(d.provides_all(&[]));
        assert!(d.provides_all(&[Capability::Multilingual]));
        assert!(!d.provides_all(&[Capability::Multilingual, Capability::LongContext]));
    }

    #[test]
    fn test_backend_serializes_snake_case() {
        assert_eq!(Backend::Accelerator.to_string(), "accelerator");
        assert_eq!(serde_json::to_string(&Backend::General).unwrap(), r#""general""#);
    }
}
