//! End-to-end tests of the HTTP surface against an in-process backend.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use infergate_core::{CodecRegistry, GatewayError, NodeInfo, ResponseEnvelope};
use infergate_server::health::{BackendChecker, HealthMonitor};
use infergate_server::network::{GatewayServices, NetworkConfig, NetworkModule};
use infergate_server::service::backend::InferenceBackend;
use infergate_server::service::config::GatewayConfig;
use infergate_server::service::handlers::HandlerDeps;
use infergate_server::service::router::ServiceRouter;
use infergate_server::service::testing::FakeBackend;
use infergate_server::stream::{SseDecoder, WireChunk};
use serde_json::{json, Value};
use tower::ServiceExt;

fn gateway(backend: FakeBackend) -> (Router, Arc<HealthMonitor>) {
    let backend: Arc<dyn InferenceBackend> = Arc::new(backend);
    let codecs = Arc::new(CodecRegistry::with_defaults());
    let deps = HandlerDeps::new(Arc::clone(&backend), Arc::clone(&codecs));
    let monitor = Arc::new(HealthMonitor::new(Duration::from_secs(60)));
    monitor.register(Arc::new(BackendChecker::new(Arc::clone(&backend))));

    let module = NetworkModule::new(
        NetworkConfig::default(),
        GatewayServices {
            gateway: Arc::new(GatewayConfig::default()),
            router: Arc::new(ServiceRouter::standard(&deps)),
            backend,
            codecs,
            monitor: Arc::clone(&monitor),
        },
    );
    (module.build_router(), monitor)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_envelope(router: Router, request: Request<Body>) -> (StatusCode, ResponseEnvelope) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn unary_completion_round_trip() {
    let (router, _) = gateway(FakeBackend::default());
    let request = post_json(
        "/v1/infer",
        &json!({
            "service": "completion",
            "payload": STANDARD.encode(r#"{"prompt":"hello"}"#),
            "correlation_id": "abc-123",
            "metadata": {"temperature": 0.2, "max_tokens": 16},
        }),
    );

    let (status, envelope) = read_envelope(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(envelope.success);
    assert_eq!(envelope.request_id, "abc-123");
    assert!(envelope.timestamp > 0);
    let data = envelope.data.unwrap();
    assert_eq!(data["task"], "completion");
    assert_eq!(data["correlation_id"], "abc-123");
}

#[tokio::test]
async fn octet_stream_uses_query_and_header() {
    let (router, _) = gateway(FakeBackend::default());
    let request = Request::post("/v1/infer?service=embedding")
        .header("content-type", "application/octet-stream")
        .header("x-correlation-id", "from-header")
        .body(Body::from("plain text to embed"))
        .unwrap();

    let (status, envelope) = read_envelope(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope.request_id, "from-header");
    assert_eq!(envelope.data.unwrap()["task"], "embedding");
}

#[tokio::test]
async fn bracketed_text_prompts_are_accepted() {
    for (service, text) in [
        ("completion", "[INST] Tell me a joke [/INST]"),
        ("embedding", "{name} is a placeholder"),
        ("embedding", "[1] Introduction"),
    ] {
        let (router, _) = gateway(FakeBackend::default());
        let request = Request::post(format!("/v1/infer?service={service}"))
            .header("content-type", "application/octet-stream")
            .body(Body::from(text))
            .unwrap();
        let (status, envelope) = read_envelope(router, request).await;
        assert_eq!(status, StatusCode::OK, "{service} rejected {text:?}");
        assert_eq!(envelope.data.unwrap()["task"], service);
    }
}

#[tokio::test]
async fn missing_service_is_invalid() {
    let (router, _) = gateway(FakeBackend::default());
    let (status, envelope) =
        read_envelope(router, post_json("/v1/infer", &json!({"payload": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope.error.unwrap().code, "INVALID");
}

#[tokio::test]
async fn unsupported_service_names_the_service() {
    let (router, _) = gateway(FakeBackend::default());
    let (status, envelope) = read_envelope(
        router,
        post_json("/v1/infer", &json!({"service": "speech", "payload": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "UNSUPPORTED_SERVICE");
    assert!(error.message.contains("speech"));
}

#[tokio::test]
async fn backend_failure_keeps_its_kind() {
    let (router, _) = gateway(FakeBackend::failing(GatewayError::timeout("backend slow")));
    let (status, envelope) = read_envelope(
        router,
        post_json(
            "/v1/infer",
            &json!({"service": "completion", "payload": STANDARD.encode("hi")}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(envelope.error.unwrap().code, "TIMEOUT");
}

#[tokio::test]
async fn streaming_chat_emits_ordered_sse_frames() {
    let (router, _) = gateway(FakeBackend::with_chunks(3));
    let payload = json!({"messages": [{"role": "user", "content": "hi"}]});
    let request = post_json(
        "/v1/infer",
        &json!({
            "service": "chat_stream",
            "payload": STANDARD.encode(payload.to_string()),
            "correlation_id": "s-1",
        }),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let chunks: Vec<WireChunk> = SseDecoder::new()
        .push(&body)
        .unwrap()
        .iter()
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.seq).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(chunks.iter().all(|c| c.correlation_id == "s-1"));
    assert!(chunks[2].is_final);
    let last = chunks[2].clone().into_chunk().unwrap();
    assert_eq!(&last.result[..], b"tok2");
}

#[tokio::test]
async fn batch_returns_per_item_envelopes() {
    let (router, _) = gateway(FakeBackend::default());
    let body = json!([
        {"service": "completion", "payload": STANDARD.encode("a"), "correlation_id": "b-1"},
        {"service": "embedding", "payload": STANDARD.encode("b"), "correlation_id": "b-2"},
    ]);
    let (status, envelope) = read_envelope(router, post_json("/v1/infer/batch", &body)).await;
    assert_eq!(status, StatusCode::OK);
    let items: Vec<ResponseEnvelope> = serde_json::from_value(envelope.data.unwrap()).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.success));
    assert_eq!(items[1].request_id, "b-2");
}

#[tokio::test]
async fn health_reflects_monitor_sweep() {
    let healthy = FakeBackend::default().with_nodes(vec![NodeInfo {
        id: "gpu-0".into(),
        address: "10.0.0.1:9000".into(),
        healthy: true,
        ..NodeInfo::default()
    }]);
    let (router, monitor) = gateway(healthy);
    monitor.check_all().await;

    let response = router
        .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["backend"]["details"]["healthy_nodes"], 1);
}

#[tokio::test]
async fn config_and_nodes_are_enveloped() {
    let (router, _) = gateway(FakeBackend::default());

    let (status, envelope) = read_envelope(
        router.clone(),
        Request::get("/v1/config").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = envelope.data.unwrap();
    assert_eq!(data["services"].as_array().unwrap().len(), 6);
    assert!(data["codecs"].is_object());
    // The middleware assigns an X-Request-Id, which becomes the envelope ID.
    assert!(uuid_like(&envelope.request_id));

    let (status, envelope) = read_envelope(
        router,
        Request::get("/v1/nodes").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope.data.unwrap(), json!([]));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (router, _) = gateway(FakeBackend::default());
    let response = router
        .oneshot(Request::get("/v2/infer").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn uuid_like(id: &str) -> bool {
    id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
}
