use std::io::Write;

use infergate_common::{Backend, Capability, ErrorKind};
use infergate_scheduler::{Config, ModelRegistry};

const CONFIG: &str = r#"
[api]
port = 9000

[scheduler]
memory_budget_bytes = 2000000000
keep_resident = ["minilm"]
idle_unload_secs = 600

[watermarks]
accelerator_high = 0.7
accelerator_critical = 0.9

[models.minilm]
capability_tags = ["embeddings"]
memory_footprint_bytes = 90000000
preferred_batch_size = 4
max_batch_size = 32
max_wait_ms = 15
smaller_variant = "minilm-small"
accelerator_batch_limit = 3

[models.minilm-small]
capability_tags = ["embeddings"]
memory_footprint_bytes = 30000000
backend_compatibility = ["general"]
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_toml() {
    let file = write_config(CONFIG);
    let config = Config::load(file.path().to_str()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.api.port, 9000);
    assert_eq!(config.scheduler.memory_budget_bytes, 2_000_000_000);
    assert_eq!(config.scheduler.keep_resident, vec!["minilm".to_string()]);
    assert_eq!(config.watermarks.accelerator_high, 0.7);
    // Untouched sections keep their defaults.
    assert_eq!(config.fallback.degradation_factor, 0.85);
    assert_eq!(config.scheduler.tick_interval_ms, 5);

    let registry = ModelRegistry::from_config(&config).unwrap();
    let minilm = registry.get("minilm").unwrap();
    assert_eq!(minilm.preferred_batch_size, 4);
    assert_eq!(minilm.accelerator_batch_limit, 3);
    assert_eq!(minilm.capability_tags, vec![Capability::Embeddings]);
    assert_eq!(
        minilm.backend_compatibility,
        vec![Backend::Accelerator, Backend::General]
    );

    let small = registry.get("minilm-small").unwrap();
    assert_eq!(small.backend_compatibility, vec![Backend::General]);
    assert_eq!(small.accelerator_batch_limit, small.preferred_batch_size);
}

#[test]
fn test_mixed_case_model_ids_are_normalised() {
    let file = write_config(
        r#"
[scheduler]
keep_resident = ["MiniLM"]

[models.MiniLM]
capability_tags = ["embeddings"]
memory_footprint_bytes = 100
smaller_variant = "MiniLM-Small"

[models.MiniLM-Small]
capability_tags = ["embeddings"]
memory_footprint_bytes = 50
"#,
    );
    let config = Config::load(file.path().to_str()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.scheduler.keep_resident, vec!["minilm".to_string()]);

    let registry = ModelRegistry::from_config(&config).unwrap();
    let minilm = registry.get("minilm").unwrap();
    assert_eq!(minilm.smaller_variant.as_deref(), Some("minilm-small"));
    assert!(registry.contains("minilm-small"));
}

#[test]
fn test_missing_file_uses_defaults() {
    let config = Config::load(Some("/nonexistent/infergate")).unwrap();
    assert_eq!(config.api.port, 8080);
    assert!(config.models.is_empty());
}

#[test]
fn test_invalid_watermarks_fail_validation() {
    let file = write_config(
        r#"
[watermarks]
accelerator_high = 0.99
accelerator_critical = 0.5
"#,
    );
    let config = Config::load(file.path().to_str()).unwrap();
    let err = config.validate().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
}

#[test]
fn test_variant_loop_fails_registry() {
    let file = write_config(
        r#"
[models.a]
capability_tags = ["embeddings"]
memory_footprint_bytes = 10
smaller_variant = "b"

[models.b]
capability_tags = ["embeddings"]
memory_footprint_bytes = 10
smaller_variant = "a"
"#,
    );
    let config = Config::load(file.path().to_str()).unwrap();
    let err = ModelRegistry::from_config(&config).err().unwrap();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert!(err.message.contains("loops"));
}

#[test]
fn test_preferred_above_max_fails_registry() {
    let file = write_config(
        r#"
[models.a]
capability_tags = ["embeddings"]
memory_footprint_bytes = 10
preferred_batch_size = 8
max_batch_size = 4
"#,
    );
    let config = Config::load(file.path().to_str()).unwrap();
    assert!(ModelRegistry::from_config(&config).is_err());
}
