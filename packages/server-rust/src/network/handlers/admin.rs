//! Operational read-only endpoints: backend passthrough and effective
//! configuration.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::{json, Value};

use super::{error_response, ok_response, request_id, AppState};

/// `GET /v1/nodes`: the backend's node list.
pub async fn nodes_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);
    match state.backend.nodes().await {
        Ok(nodes) => ok_response(request_id, json!(nodes)),
        Err(err) => error_response(request_id, &err),
    }
}

/// `GET /v1/metrics`: the backend's aggregate counters.
pub async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);
    match state.backend.metrics().await {
        Ok(metrics) => ok_response(request_id, json!(metrics)),
        Err(err) => error_response(request_id, &err),
    }
}

/// `GET /v1/config`: effective non-secret configuration, registered
/// services, and codec MIME types.
pub async fn config_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    ok_response(request_id(&headers), effective_config(&state))
}

fn effective_config(state: &AppState) -> Value {
    json!({
        "network": state.config.to_json(),
        "gateway": state.gateway.to_json(),
        "services": state.router.services(),
        "codecs": state.codecs.list_codecs(),
        "health": {
            "interval_ms": u64::try_from(state.monitor.interval().as_millis()).unwrap_or(u64::MAX),
            "checkers": state.monitor.checker_names(),
        },
    })
}
