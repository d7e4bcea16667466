//! Capability tags attached to models.

use serde::{Deserialize, Serialize};

/// Logical capabilities a model provides.
///
/// Requests may require a set of capabilities; a smaller model variant is only
/// an acceptable substitute when it provides every capability the request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Vector embeddings generation
    Embeddings,
    /// Free-form text generation
    TextGeneration,
    /// Inputs in languages other than English
    Multilingual,
    /// Inputs longer than the common 512-token window
    LongContext,
}

impl Capability {
    /// All capability variants for iteration.
    pub const ALL: [Capability; 4] = [
        Capability::Embeddings,
        Capability::TextGeneration,
        Capability::Multilingual,
        Capability::LongContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Embeddings => "embeddings",
            Capability::TextGeneration => "text_generation",
            Capability::Multilingual => "multilingual",
            Capability::LongContext => "long_context",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
