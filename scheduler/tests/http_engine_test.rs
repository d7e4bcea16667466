use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use infergate_common::{Backend, Output, Payload};
use infergate_scheduler::test_util::descriptor;
use infergate_scheduler::{EngineError, ExecutionEngine, HttpEngine, ResourceProbe};

async fn engine(server: &MockServer) -> HttpEngine {
    HttpEngine::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_execute_sends_ordered_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/execute"))
        .and(body_json(json!({
            "model_id": "minilm",
            "backend": "accelerator",
            "payloads": [
                {"kind": "embedding", "input": "a"},
                {"kind": "embedding", "input": "b"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "outputs": [
                {"kind": "embedding", "vector": [1.0]},
                {"kind": "embedding", "vector": [2.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outputs = engine(&server)
        .await
        .execute(
            "minilm",
            Backend::Accelerator,
            &[Payload::embedding("a"), Payload::embedding("b")],
        )
        .await
        .unwrap();

    assert_eq!(
        outputs,
        vec![
            Output::Embedding { vector: vec![1.0] },
            Output::Embedding { vector: vec![2.0] },
        ]
    );
}

#[tokio::test]
async fn test_execute_partial_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/execute"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": {
                "kind": "partial_failure",
                "message": "payload 2 is malformed",
                "failed_indices": [2]
            }
        })))
        .mount(&server)
        .await;

    let payloads: Vec<_> = ["a", "b", "c", "d"].iter().map(|s| Payload::embedding(*s)).collect();
    let err = engine(&server)
        .await
        .execute("minilm", Backend::General, &payloads)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EngineError::Partial {
            failed: vec![2],
            message: "payload 2 is malformed".to_string()
        }
    );
}

#[tokio::test]
async fn test_execute_resource_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/execute"))
        .respond_with(ResponseTemplate::new(507).set_body_json(json!({
            "error": {"kind": "resource_exhausted", "message": "accelerator memory full"}
        })))
        .mount(&server)
        .await;

    let err = engine(&server)
        .await
        .execute("minilm", Backend::Accelerator, &[Payload::embedding("a")])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::ResourceExhausted("accelerator memory full".to_string())
    );
}

#[tokio::test]
async fn test_execute_undecodable_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = engine(&server)
        .await
        .execute("minilm", Backend::General, &[Payload::embedding("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Protocol(_)));
}

#[tokio::test]
async fn test_load_and_unload_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/models/load"))
        .and(body_json(json!({
            "model_id": "minilm",
            "memory_footprint": 100,
            "backends": ["accelerator", "general"]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/models/unload"))
        .and(body_json(json!({"model_id": "minilm"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server).await;
    engine.load_model(&descriptor("minilm")).await.unwrap();
    engine.unload_model("minilm").await.unwrap();
}

#[tokio::test]
async fn test_load_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/models/load"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"kind": "load_failed", "message": "no artifacts for minilm"}
        })))
        .mount(&server)
        .await;

    let err = engine(&server)
        .await
        .load_model(&descriptor("minilm"))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::LoadFailed("no artifacts for minilm".to_string()));
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_healthy": true,
            "version": "0.3.1",
            "models_loaded": ["minilm"]
        })))
        .mount(&server)
        .await;

    let health = engine(&server).await.health_check().await.unwrap();
    assert!(health.is_healthy);
    assert_eq!(health.version.as_deref(), Some("0.3.1"));
    assert_eq!(health.models_loaded, vec!["minilm".to_string()]);
}

#[tokio::test]
async fn test_unhealthy_status_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let health = engine(&server).await.health_check().await.unwrap();
    assert!(!health.is_healthy);
}

#[tokio::test]
async fn test_probe_reads_backend_load() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/backends/accelerator/load"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "backend": "accelerator",
            "utilization": 0.42,
            "memory_used": 1024,
            "memory_total": 4096
        })))
        .mount(&server)
        .await;

    let load = engine(&server)
        .await
        .sample(Backend::Accelerator)
        .await
        .unwrap();
    assert_eq!(load.utilization, 0.42);
    assert_eq!(load.memory_free(), 3072);
}

#[tokio::test]
async fn test_unreachable_engine_is_transport_error() {
    let engine = HttpEngine::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
    let err = engine
        .execute("minilm", Backend::General, &[Payload::embedding("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)));
}
