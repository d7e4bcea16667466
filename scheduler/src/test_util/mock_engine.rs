use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use infergate_common::{Backend, ModelDescriptor, Output, Payload};

use crate::engine::{EngineError, EngineHealth, ExecutionEngine};

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteCall {
    pub model_id: String,
    pub backend: Backend,
    pub inputs: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ExecuteCall>,
    loads: Vec<String>,
    unloads: Vec<String>,
    exhausted_models: HashSet<String>,
    exhausted_backends: HashSet<Backend>,
    failing_loads: HashSet<String>,
    failing_batches: usize,
    latency: Duration,
}

/// Scriptable in-process execution engine.
///
/// Payloads whose text contains `malformed` fail with a structured partial
/// error; everything else succeeds deterministically.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// The embedding returned for `text`.
    pub fn embedding_for(text: &str) -> Vec<f32> {
        text.bytes().map(f32::from).collect()
    }

    /// The generation returned for `prompt`.
    pub fn generation_for(prompt: &str) -> String {
        format!("echo: {}", prompt)
    }

    /// Fail every call for `model_id` with resource exhaustion.
    pub fn exhaust(&self, model_id: &str) {
        self.state.lock().exhausted_models.insert(model_id.to_string());
    }

    /// Fail every call on `backend` with resource exhaustion.
    pub fn exhaust_backend(&self, backend: Backend) {
        self.state.lock().exhausted_backends.insert(backend);
    }

    pub fn restore(&self) {
        let mut state = self.state.lock();
        state.exhausted_models.clear();
        state.exhausted_backends.clear();
    }

    pub fn fail_loads_for(&self, model_id: &str) {
        self.state.lock().failing_loads.insert(model_id.to_string());
    }

    /// Fail the next `count` calls as whole batches.
    pub fn fail_next_batches(&self, count: usize) {
        self.state.lock().failing_batches = count;
    }

    pub fn calls(&self) -> Vec<ExecuteCall> {
        self.state.lock().calls.clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.state.lock().loads.clone()
    }

    pub fn unloads(&self) -> Vec<String> {
        self.state.lock().unloads.clone()
    }
}

#[async_trait]
impl ExecutionEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> Result<EngineHealth, EngineError> {
        let state = self.state.lock();
        let mut loaded: Vec<String> = state.loads.clone();
        loaded.retain(|m| !state.unloads.contains(m));
        Ok(EngineHealth {
            is_healthy: true,
            version: Some("mock".to_string()),
            models_loaded: loaded,
        })
    }

    async fn load_model(&self, descriptor: &ModelDescriptor) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.failing_loads.contains(&descriptor.model_id) {
            return Err(EngineError::LoadFailed(format!(
                "artifacts for {} unavailable",
                descriptor.model_id
            )));
        }
        state.loads.push(descriptor.model_id.clone());
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), EngineError> {
        self.state.lock().unloads.push(model_id.to_string());
        Ok(())
    }

    async fn execute(
        &self,
        model_id: &str,
        backend: Backend,
        payloads: &[Payload],
    ) -> Result<Vec<Output>, EngineError> {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(ExecuteCall {
                model_id: model_id.to_string(),
                backend,
                inputs: payloads.iter().map(|p| p.text().to_string()).collect(),
            });
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        {
            let mut state = self.state.lock();
            if state.exhausted_models.contains(model_id) || state.exhausted_backends.contains(&backend)
            {
                return Err(EngineError::ResourceExhausted(format!(
                    "{} has no capacity on {}",
                    model_id, backend
                )));
            }
            if state.failing_batches > 0 {
                state.failing_batches -= 1;
                return Err(EngineError::Batch("engine crashed".to_string()));
            }
        }

        let failed: Vec<usize> = payloads
            .iter()
            .enumerate()
            .filter(|(_, p)| p.text().contains("malformed"))
            .map(|(i, _)| i)
            .collect();
        if !failed.is_empty() {
            return Err(EngineError::Partial {
                failed,
                message: "malformed payload".to_string(),
            });
        }

        Ok(payloads
            .iter()
            .map(|payload| match payload {
                Payload::Embedding { input } => Output::Embedding {
                    vector: Self::embedding_for(input),
                },
                Payload::Generation { prompt, .. } => Output::Generation {
                    text: Self::generation_for(prompt),
                    tokens: Some(prompt.split_whitespace().count() as u32),
                },
            })
            .collect())
    }
}
