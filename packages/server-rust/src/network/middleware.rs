//! HTTP middleware stack for the gateway.
//!
//! Builds the Tower middleware pipeline applied to all HTTP requests.
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use std::any::Any;

use axum::extract::DefaultBodyLimit;
use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use infergate_core::{GatewayError, ResponseEnvelope};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any as AnyHeader, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use super::config::NetworkConfig;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Wraps `router` in the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `Compression` -- gzip; `text/event-stream` responses are left alone
/// 4. `CORS` -- Cross-Origin Resource Sharing based on configured origins
/// 5. `Timeout` -- 408 if response headers are not ready in time
/// 6. `CatchPanic` -- a handler panic becomes a 500 `INTERNAL` envelope
/// 7. `RequestBodyLimit` -- 413 for bodies over the configured limit
/// 8. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
pub fn apply_http_layers<S>(router: Router<S>, config: &NetworkConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(RequestBodyLimitLayer::new(config.body_limit))
        .layer(PropagateRequestIdLayer::new(x_request_id));

    // The tower-http limit replaces axum's per-extractor default.
    router.layer(DefaultBodyLimit::disable()).layer(layers)
}

/// Converts a caught panic into an `INTERNAL` error envelope.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %detail, "handler panicked");

    let err = GatewayError::internal("internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ResponseEnvelope::err(String::new(), &err)),
    )
        .into_response()
}

/// Builds the CORS layer from the configured list of allowed origins.
///
/// A wildcard `"*"` in the origins list allows any origin. Otherwise,
/// each origin string is parsed and added to an explicit allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AnyHeader)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::routing::{get, post};
    use tower::ServiceExt;

    use super::*;

    fn app(config: &NetworkConfig) -> Router {
        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/boom", get(|| async { panic!("kaboom") as &str }))
            .route("/echo", post(|body: axum::body::Bytes| async move { body }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "late"
                }),
            );
        apply_http_layers(router, config)
    }

    #[tokio::test]
    async fn request_id_is_assigned_and_propagated() {
        let response = app(&NetworkConfig::default())
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[X_REQUEST_ID].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn panic_becomes_internal_envelope() {
        let response = app(&NetworkConfig::default())
            .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let envelope: ResponseEnvelope = serde_json::from_slice(&body).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "INTERNAL");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = NetworkConfig {
            body_limit: 8,
            ..NetworkConfig::default()
        };
        let response = app(&config)
            .oneshot(
                Request::post("/echo")
                    .header("content-length", "32")
                    .body(Body::from(vec![0u8; 32]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_with_408() {
        let config = NetworkConfig {
            request_timeout: Duration::from_secs(1),
            ..NetworkConfig::default()
        };
        let response = app(&config)
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn build_cors_layer_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
        ];
        let _cors = build_cors_layer(&origins);
    }
}
