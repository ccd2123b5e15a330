//! HTTP handler definitions for the gateway.
//!
//! Defines `AppState`, the shared state carried through axum extractors,
//! and the envelope helpers every JSON endpoint answers with.

pub mod admin;
pub mod health;
pub mod infer;

pub use admin::{config_handler, metrics_handler, nodes_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use infer::{batch_handler, infer_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use infergate_core::{CodecRegistry, GatewayError, ResponseEnvelope};
use serde_json::Value;

use super::middleware::X_REQUEST_ID;
use super::{NetworkConfig, ShutdownController};
use crate::health::HealthMonitor;
use crate::service::backend::InferenceBackend;
use crate::service::config::GatewayConfig;
use crate::service::router::ServiceRouter;

/// Shared application state passed to all axum handlers via `State`.
///
/// Every field is an `Arc` (or `Copy`), so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    pub gateway: Arc<GatewayConfig>,
    pub router: Arc<ServiceRouter>,
    /// Backend used directly by the passthrough endpoints.
    pub backend: Arc<dyn InferenceBackend>,
    pub codecs: Arc<CodecRegistry>,
    pub monitor: Arc<HealthMonitor>,
    /// Process start, for `uptime_secs`.
    pub start_time: Instant,
}

/// `200 OK` with a success envelope.
pub(crate) fn ok_response(request_id: impl Into<String>, data: Value) -> Response {
    (StatusCode::OK, Json(ResponseEnvelope::ok(request_id, data))).into_response()
}

/// Error envelope with the status mapped from the error kind.
pub(crate) fn error_response(request_id: impl Into<String>, err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.kind().http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ResponseEnvelope::err(request_id, err))).into_response()
}

/// The `X-Request-Id` assigned by the middleware, or empty.
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
