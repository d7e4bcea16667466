//! Configuration for the scheduler.

use std::collections::HashMap;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use infergate_common::{Backend, Capability, ModelDescriptor};

use crate::error::{Result, SchedulerError};

/// Main configuration structure, supplied once at process start.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub watermarks: WatermarkConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Per-model batching and placement settings, keyed by model id.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Execution engine runner endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub base_url: String,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_url(),
            timeout_secs: default_engine_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on the summed footprint of resident models.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,
    /// Resource monitor sampling interval.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,
    /// Batch sweep interval (the scheduler tick).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Queue depth at or above which `queue_with_eta` is no longer offered.
    #[serde(default = "default_queue_ceiling")]
    pub queue_ceiling: usize,
    /// Max wait applied to requests that do not carry their own.
    #[serde(default = "default_max_wait")]
    pub default_max_wait_ms: u64,
    /// Payloads larger than this always run in a singleton batch.
    #[serde(default = "default_max_batchable_payload")]
    pub max_batchable_payload_bytes: usize,
    /// Unload unpinned models idle for longer than this. Disabled when unset.
    #[serde(default)]
    pub idle_unload_secs: Option<u64>,
    /// Models loaded at startup and never evicted.
    #[serde(default)]
    pub keep_resident: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: default_memory_budget(),
            monitor_interval_ms: default_monitor_interval(),
            tick_interval_ms: default_tick_interval(),
            queue_ceiling: default_queue_ceiling(),
            default_max_wait_ms: default_max_wait(),
            max_batchable_payload_bytes: default_max_batchable_payload(),
            idle_unload_secs: None,
            keep_resident: vec![],
        }
    }
}

/// Accelerator utilization thresholds, as fractions.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WatermarkConfig {
    /// Above this the accelerator is no longer preferred for new batches.
    #[serde(default = "default_high_watermark")]
    pub accelerator_high: f64,
    /// Above this failed accelerator work is moved to the general backend.
    #[serde(default = "default_critical_watermark")]
    pub accelerator_critical: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            accelerator_high: default_high_watermark(),
            accelerator_critical: default_critical_watermark(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FallbackConfig {
    /// Quality factor reported when a request is moved to a smaller variant.
    #[serde(default = "default_degradation_factor")]
    pub degradation_factor: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            degradation_factor: default_degradation_factor(),
        }
    }
}

/// Per-model settings. Turned into a [`ModelDescriptor`] at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub capability_tags: Vec<Capability>,
    pub memory_footprint_bytes: u64,
    #[serde(default = "default_preferred_batch_size")]
    pub preferred_batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_batch_window")]
    pub max_wait_ms: u64,
    #[serde(default = "default_backends")]
    pub backend_compatibility: Vec<Backend>,
    #[serde(default)]
    pub smaller_variant: Option<String>,
    /// Accelerator/general crossover batch size. Defaults to `preferred_batch_size`.
    #[serde(default)]
    pub accelerator_batch_limit: Option<usize>,
}

impl ModelConfig {
    pub fn descriptor(&self, model_id: &str) -> ModelDescriptor {
        ModelDescriptor {
            model_id: model_id.to_string(),
            capability_tags: self.capability_tags.clone(),
            memory_footprint: self.memory_footprint_bytes,
            preferred_batch_size: self.preferred_batch_size,
            max_batch_size: self.max_batch_size,
            max_wait_ms: self.max_wait_ms,
            backend_compatibility: self.backend_compatibility.clone(),
            smaller_variant: self.smaller_variant.clone(),
            accelerator_batch_limit: self
                .accelerator_batch_limit
                .unwrap_or(self.preferred_batch_size),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_engine_url() -> String {
    "http://localhost:9090".to_string()
}
fn default_engine_timeout() -> u64 {
    120
}
fn default_memory_budget() -> u64 {
    8 * 1024 * 1024 * 1024
}
fn default_monitor_interval() -> u64 {
    1000
}
fn default_tick_interval() -> u64 {
    5
}
fn default_queue_ceiling() -> usize {
    64
}
fn default_max_wait() -> u64 {
    30_000
}
fn default_max_batchable_payload() -> usize {
    64 * 1024
}
fn default_high_watermark() -> f64 {
    0.80
}
fn default_critical_watermark() -> f64 {
    0.95
}
fn default_degradation_factor() -> f64 {
    0.85
}
fn default_preferred_batch_size() -> usize {
    4
}
fn default_max_batch_size() -> usize {
    16
}
fn default_batch_window() -> u64 {
    20
}
fn default_backends() -> Vec<Backend> {
    vec![Backend::Accelerator, Backend::General]
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (INFERGATE__SECTION__KEY format)
    /// 2. The TOML file at `path` (or `config.toml`), if present
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .set_default("logging.level", default_log_level())?
            .add_source(File::with_name(path.unwrap_or("config")).required(false))
            .add_source(
                Environment::with_prefix("INFERGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        Ok(config.normalize_ids())
    }

    /// Lowercase every model id. Map keys are already lowercased by the
    /// loader; values naming models are not.
    pub fn normalize_ids(mut self) -> Self {
        self.models = self
            .models
            .into_iter()
            .map(|(id, mut model)| {
                model.smaller_variant = model.smaller_variant.map(|v| v.to_lowercase());
                (id.to_lowercase(), model)
            })
            .collect();
        for model_id in &mut self.scheduler.keep_resident {
            *model_id = model_id.to_lowercase();
        }
        self
    }

    /// Check cross-field constraints. Model descriptors are validated by the registry.
    pub fn validate(&self) -> Result<()> {
        let w = &self.watermarks;
        if !(w.accelerator_high > 0.0
            && w.accelerator_high <= w.accelerator_critical
            && w.accelerator_critical <= 1.0)
        {
            return Err(SchedulerError::configuration(format!(
                "watermarks must satisfy 0 < accelerator_high ({}) <= accelerator_critical ({}) <= 1",
                w.accelerator_high, w.accelerator_critical
            )));
        }

        let factor = self.fallback.degradation_factor;
        if !(0.8..=0.9).contains(&factor) {
            return Err(SchedulerError::configuration(format!(
                "fallback.degradation_factor must be within 0.8..=0.9, got {}",
                factor
            )));
        }

        if self.scheduler.memory_budget_bytes == 0 {
            return Err(SchedulerError::configuration(
                "scheduler.memory_budget_bytes must be greater than zero",
            ));
        }
        if self.scheduler.tick_interval_ms == 0 || self.scheduler.monitor_interval_ms == 0 {
            return Err(SchedulerError::configuration(
                "scheduler tick and monitor intervals must be greater than zero",
            ));
        }

        for model_id in &self.scheduler.keep_resident {
            if !self.models.contains_key(model_id) {
                return Err(SchedulerError::configuration(format!(
                    "keep_resident references unknown model '{}'",
                    model_id
                )));
            }
        }

        for (model_id, model) in &self.models {
            if model.memory_footprint_bytes > self.scheduler.memory_budget_bytes {
                return Err(SchedulerError::configuration(format!(
                    "model '{}' needs {} bytes but the memory budget is {} bytes",
                    model_id, model.memory_footprint_bytes, self.scheduler.memory_budget_bytes
                )));
            }
        }

        Ok(())
    }

    /// Descriptors for every configured model.
    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        self.models
            .iter()
            .map(|(id, model)| model.descriptor(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelConfig {
        ModelConfig {
            capability_tags: vec![Capability::Embeddings],
            memory_footprint_bytes: 1024,
            preferred_batch_size: 3,
            max_batch_size: 8,
            max_wait_ms: 10,
            backend_compatibility: default_backends(),
            smaller_variant: None,
            accelerator_batch_limit: None,
        }
    }

    #[test]
    fn test_default_api_config() {
        let api = ApiConfig::default();
        assert_eq!(api.host, "0.0.0.0");
        assert_eq!(api.port, 8080);
    }

    #[test]
    fn test_default_watermarks() {
        let w = WatermarkConfig::default();
        assert_eq!(w.accelerator_high, 0.80);
        assert_eq!(w.accelerator_critical, 0.95);
    }

    #[test]
    fn test_crossover_defaults_to_preferred_batch_size() {
        let descriptor = model().descriptor("minilm");
        assert_eq!(descriptor.accelerator_batch_limit, 3);

        let mut overridden = model();
        overridden.accelerator_batch_limit = Some(4);
        assert_eq!(overridden.descriptor("minilm").accelerator_batch_limit, 4);
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let mut config = Config::default();
        config.watermarks.accelerator_high = 0.99;
        config.watermarks.accelerator_critical = 0.9;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind, infergate_common::ErrorKind::Configuration);
    }

    #[test]
    fn test_normalize_ids_lowercases_references() {
        let mut config = Config::default();
        let mut large = model();
        large.smaller_variant = Some("MiniLM-Small".to_string());
        config.models.insert("MiniLM".to_string(), large);
        config.models.insert("minilm-small".to_string(), model());
        config.scheduler.keep_resident = vec!["MiniLM".to_string()];

        let config = config.normalize_ids();
        assert!(config.models.contains_key("minilm"));
        assert_eq!(
            config.models["minilm"].smaller_variant.as_deref(),
            Some("minilm-small")
        );
        assert_eq!(config.scheduler.keep_resident, vec!["minilm".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_keep_resident() {
        let mut config = Config::default();
        config.scheduler.keep_resident = vec!["ghost".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_model_larger_than_budget() {
        let mut config = Config::default();
        config.scheduler.memory_budget_bytes = 512;
        config.models.insert("minilm".to_string(), model());
        assert!(config.validate().is_err());

        config.scheduler.memory_budget_bytes = 4096;
        assert!(config.validate().is_ok());
    }
}
