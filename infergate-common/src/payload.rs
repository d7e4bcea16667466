//! Request payloads and per-item results.

use serde::{Deserialize, Serialize};

/// The two request kinds the scheduler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Embedding,
    Generation,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Embedding => write!(f, "embedding"),
            RequestKind::Generation => write!(f, "generation"),
        }
    }
}

/// Strongly-typed request payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Text to embed into a vector.
    Embedding { input: String },
    /// Prompt to continue.
    Generation {
        prompt: String,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default)]
        temperature: Option<f32>,
    },
}

impl Payload {
    pub fn embedding(input: impl Into<String>) -> Self {
        Payload::Embedding {
            input: input.into(),
        }
    }

    pub fn generation(prompt: impl Into<String>) -> Self {
        Payload::Generation {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Payload::Embedding { .. } => RequestKind::Embedding,
            Payload::Generation { .. } => RequestKind::Generation,
        }
    }

    /// The text carried by the payload.
    pub fn text(&self) -> &str {
        match self {
            Payload::Embedding { input } => input,
            Payload::Generation { prompt, .. } => prompt,
        }
    }

    /// Approximate size in bytes, used for the batchability heuristic.
    pub fn size_bytes(&self) -> usize {
        self.text().len()
    }
}

/// Per-item result returned by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Embedding {
        vector: Vec<f32>,
    },
    Generation {
        text: String,
        #[serde(default)]
        tokens: Option<u32>,
    },
}

impl Output {
    pub fn kind(&self) -> RequestKind {
        match self {
            Output::Embedding { .. } => RequestKind::Embedding,
            Output::Generation { .. } => RequestKind::Generation,
        }
    }
}

/// Request priority. `Critical` forces its batch to seal immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn is_critical(&self) -> bool {
        matches!(self, Priority::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagged_serialization() {
        let payload = Payload::embedding("hello");
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"kind":"embedding","input":"hello"}"#);
    }

    #[test]
    fn test_generation_payload_minimal() {
        let json = r#"{"kind": "generation", "prompt": "Once upon"}"#;
        let payload: Payload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind(), RequestKind::Generation);
        assert_eq!(payload.text(), "Once upon");
        assert_eq!(payload.size_bytes(), 9);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert!(Priority::Critical.is_critical());
        assert!(!Priority::High.is_critical());
    }
}
