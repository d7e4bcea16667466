//! Builders and mocks shared by unit and integration tests.

pub mod mock_engine;

pub use mock_engine::{ExecuteCall, MockEngine};

use std::collections::HashMap;
use std::sync::Arc;

use infergate_common::{Backend, Capability, ModelDescriptor};

use crate::config::{Config, ModelConfig};
use crate::monitor::FixedProbe;
use crate::scheduler::Scheduler;

/// Embedding model on both backends: preferred batch 3, max 8, 20ms window.
pub fn descriptor(model_id: &str) -> ModelDescriptor {
    model_config().descriptor(model_id)
}

pub fn model_config() -> ModelConfig {
    ModelConfig {
        capability_tags: vec![Capability::Embeddings],
        memory_footprint_bytes: 100,
        preferred_batch_size: 3,
        max_batch_size: 8,
        max_wait_ms: 20,
        backend_compatibility: vec![Backend::Accelerator, Backend::General],
        smaller_variant: None,
        accelerator_batch_limit: None,
    }
}

pub fn generation_model_config() -> ModelConfig {
    ModelConfig {
        capability_tags: vec![Capability::TextGeneration],
        memory_footprint_bytes: 400,
        preferred_batch_size: 2,
        max_batch_size: 4,
        max_wait_ms: 50,
        backend_compatibility: vec![Backend::General],
        smaller_variant: None,
        accelerator_batch_limit: None,
    }
}

/// Config with an embedding model `minilm` (variant `minilm-small`) and a
/// generation model `tinyllama`, inside a 1000 byte budget.
pub fn test_config() -> Config {
    let mut minilm = model_config();
    minilm.smaller_variant = Some("minilm-small".to_string());
    minilm.memory_footprint_bytes = 300;

    let mut models = HashMap::new();
    models.insert("minilm".to_string(), minilm);
    models.insert("minilm-small".to_string(), model_config());
    models.insert("tinyllama".to_string(), generation_model_config());

    let mut config = Config {
        models,
        ..Default::default()
    };
    config.scheduler.memory_budget_bytes = 1_000;
    config.scheduler.tick_interval_ms = 5;
    config.scheduler.monitor_interval_ms = 1_000;
    config.scheduler.queue_ceiling = 16;
    config
}

/// Everything a scheduler test needs to drive and observe the scheduler.
pub struct TestScheduler {
    pub scheduler: Scheduler,
    pub engine: Arc<MockEngine>,
    pub accelerator: Arc<FixedProbe>,
    pub general: Arc<FixedProbe>,
}

/// Build and start a scheduler over a [`MockEngine`] and fixed probes.
pub async fn start_scheduler(config: Config) -> TestScheduler {
    start_scheduler_with(config, MockEngine::new()).await
}

pub async fn start_scheduler_with(config: Config, engine: MockEngine) -> TestScheduler {
    let engine = Arc::new(engine);
    let accelerator = Arc::new(FixedProbe::new());
    let general = Arc::new(FixedProbe::new());
    let scheduler = Scheduler::new(
        &config,
        engine.clone(),
        accelerator.clone(),
        general.clone(),
    )
    .expect("test config is valid");
    scheduler.start().await.expect("scheduler starts");
    TestScheduler {
        scheduler,
        engine,
        accelerator,
        general,
    }
}
