//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::health::HealthStatus;
use crate::network::HealthState;

/// `GET /v1/health`: the monitor's latest snapshot plus lifecycle state.
///
/// Answers 503 when the monitor reports `unhealthy` or the gateway is
/// draining, 200 otherwise (including `unknown` before the first sweep).
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let status = state.monitor.overall_status();
    let lifecycle = state.shutdown.health_state();
    let checks = state.monitor.results();

    let code = if status == HealthStatus::Unhealthy || !lifecycle.accepts_requests() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = json!({
        "status": status.as_str(),
        "checks": &*checks,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "state": lifecycle.as_str(),
        "in_flight": state.shutdown.in_flight_count(),
    });
    (code, Json(body)).into_response()
}

/// Liveness probe: the process is up and serving HTTP.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only in the `Ready` state.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::to_bytes;
    use infergate_core::NodeInfo;
    use serde_json::Value;

    use super::*;
    use crate::health::BackendChecker;
    use crate::network::handlers::test_support::state_with;
    use crate::service::testing::FakeBackend;

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn healthy_node() -> NodeInfo {
        NodeInfo {
            id: "n1".into(),
            healthy: true,
            ..NodeInfo::default()
        }
    }

    #[tokio::test]
    async fn unknown_before_first_sweep() {
        let state = state_with(FakeBackend::default());
        let response = health_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["state"], "starting");
        assert_eq!(json["in_flight"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn reports_checker_results() {
        let backend = FakeBackend::default().with_nodes(vec![healthy_node()]);
        let state = state_with(FakeBackend::default());
        state
            .monitor
            .register(Arc::new(BackendChecker::new(Arc::new(backend))));
        state.monitor.check_all().await;

        let json = body_json(health_handler(State(state)).await).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"]["backend"]["status"], "healthy");
    }

    #[tokio::test]
    async fn unhealthy_backend_yields_503() {
        let state = state_with(FakeBackend::default());
        state
            .monitor
            .register(Arc::new(BackendChecker::new(Arc::new(FakeBackend::default()))));
        state.monitor.check_all().await;

        let response = health_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "unhealthy");
    }

    #[tokio::test]
    async fn draining_yields_503() {
        let state = state_with(FakeBackend::default());
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();
        let response = health_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["state"], "draining");
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_lifecycle() {
        let state = state_with(FakeBackend::default());
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);
        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
