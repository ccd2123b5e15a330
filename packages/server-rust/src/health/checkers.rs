use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use infergate_core::CircuitState;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{HealthCheckResult, HealthChecker, HealthStatus};
use crate::service::backend::InferenceBackend;
use crate::service::resilient::ResilientBackend;

// ---------------------------------------------------------------------------
// CompositeChecker
// ---------------------------------------------------------------------------

/// Runs several checkers as one. Healthy only if every sub-check is healthy;
/// each sub-result is kept under its checker's name in `details`.
pub struct CompositeChecker {
    name: String,
    checkers: Vec<Arc<dyn HealthChecker>>,
}

impl CompositeChecker {
    #[must_use]
    pub fn new(name: impl Into<String>, checkers: Vec<Arc<dyn HealthChecker>>) -> Self {
        Self {
            name: name.into(),
            checkers,
        }
    }
}

#[async_trait]
impl HealthChecker for CompositeChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, cancel: &CancellationToken) -> HealthCheckResult {
        let results = join_all(self.checkers.iter().map(|c| c.check(cancel))).await;

        let failed = results
            .iter()
            .filter(|r| r.status != HealthStatus::Healthy)
            .count();
        let mut combined = if failed == 0 {
            HealthCheckResult::healthy(format!("all {} checks passed", results.len()))
        } else {
            HealthCheckResult::unhealthy(format!("{failed} of {} checks failed", results.len()))
        };
        for (checker, result) in self.checkers.iter().zip(results) {
            let value = serde_json::to_value(&result).unwrap_or(Value::Null);
            combined = combined.with_detail(checker.name(), value);
        }
        combined
    }
}

// ---------------------------------------------------------------------------
// BackendChecker
// ---------------------------------------------------------------------------

/// Healthy when the backend lists at least one node and at least one node
/// reports itself healthy.
pub struct BackendChecker {
    backend: Arc<dyn InferenceBackend>,
}

impl BackendChecker {
    #[must_use]
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl HealthChecker for BackendChecker {
    fn name(&self) -> &str {
        "backend"
    }

    async fn check(&self, cancel: &CancellationToken) -> HealthCheckResult {
        let start = Instant::now();
        let nodes = tokio::select! {
            biased;
            () = cancel.cancelled() => return HealthCheckResult::unhealthy("backend check cancelled"),
            nodes = self.backend.nodes() => nodes,
        };
        let mut result = match nodes {
            Ok(nodes) if nodes.is_empty() => HealthCheckResult::unhealthy("backend reports no nodes"),
            Ok(nodes) => {
                let healthy = nodes.iter().filter(|n| n.healthy).count();
                let result = if healthy == 0 {
                    HealthCheckResult::unhealthy("no healthy backend nodes")
                } else {
                    HealthCheckResult::healthy(format!("{healthy} of {} nodes healthy", nodes.len()))
                };
                result
                    .with_detail("nodes", nodes.len())
                    .with_detail("healthy_nodes", healthy)
            }
            Err(err) => HealthCheckResult::unhealthy(format!("backend unreachable: {err}"))
                .with_detail("code", err.kind().as_str()),
        };
        result.duration = start.elapsed();
        result
    }
}

// ---------------------------------------------------------------------------
// CircuitChecker
// ---------------------------------------------------------------------------

/// Reports the resilient backend's circuit state: healthy while closed,
/// unhealthy while open, unknown while half-open.
pub struct CircuitChecker<B> {
    backend: Arc<ResilientBackend<B>>,
}

impl<B> CircuitChecker<B> {
    #[must_use]
    pub fn new(backend: Arc<ResilientBackend<B>>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: InferenceBackend + 'static> HealthChecker for CircuitChecker<B> {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    async fn check(&self, _cancel: &CancellationToken) -> HealthCheckResult {
        let state = self.backend.circuit_state();
        let status = match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::Open => HealthStatus::Unhealthy,
            CircuitState::HalfOpen => HealthStatus::Unknown,
        };
        HealthCheckResult::new(status, format!("circuit {}", state.as_str()))
            .with_detail("state", state.as_str())
            .with_detail("failures", self.backend.circuit_failures())
    }
}
