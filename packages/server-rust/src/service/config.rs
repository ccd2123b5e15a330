use std::time::Duration;

use infergate_core::resilience::{CircuitBreakerConfig, RetryPolicy};
use serde_json::{json, Value};

/// Gateway-level configuration for backend access and background tasks.
///
/// Controls the backend endpoint, resiliency settings, the health polling
/// interval, and per-stream buffering.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the inference backend (e.g., `http://127.0.0.1:9000`).
    pub backend_url: String,
    /// Timeout applied to each unary backend HTTP call.
    pub backend_timeout: Duration,
    /// Retry policy applied to every backend call.
    pub retry: RetryPolicy,
    /// Circuit breaker guarding the backend.
    pub breaker: CircuitBreakerConfig,
    /// Interval between health monitor sweeps.
    pub health_interval: Duration,
    /// Deadline for each health check within a sweep.
    pub health_check_timeout: Duration,
    /// Capacity of the chunk channel between a backend stream and the framer.
    pub stream_channel_capacity: usize,
    /// Maximum number of requests accepted by one batch call.
    pub max_batch_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:9000".to_string(),
            backend_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            health_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(5),
            stream_channel_capacity: 64,
            max_batch_size: 32,
        }
    }
}

impl GatewayConfig {
    /// Non-secret view of the configuration, served by `GET /v1/config`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_json(&self) -> Value {
        json!({
            "backend_url": self.backend_url,
            "backend_timeout_ms": self.backend_timeout.as_millis() as u64,
            "retry": {
                "enabled": self.retry.enabled,
                "max_attempts": self.retry.max_attempts,
                "base_backoff_ms": self.retry.base_backoff.as_millis() as u64,
                "max_backoff_ms": self.retry.max_backoff.as_millis() as u64,
                "multiplier": self.retry.multiplier,
                "max_elapsed_ms": self.retry.max_elapsed.as_millis() as u64,
            },
            "circuit_breaker": {
                "max_failures": self.breaker.max_failures,
                "reset_timeout_ms": self.breaker.reset_timeout.as_millis() as u64,
            },
            "health_interval_ms": self.health_interval.as_millis() as u64,
            "health_check_timeout_ms": self.health_check_timeout.as_millis() as u64,
            "stream_channel_capacity": self.stream_channel_capacity,
            "max_batch_size": self.max_batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.backend_url, "http://127.0.0.1:9000");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.breaker.max_failures, 5);
        assert_eq!(config.health_interval, Duration::from_secs(10));
        assert_eq!(config.stream_channel_capacity, 64);
    }

    #[test]
    fn json_view_uses_millis() {
        let view = GatewayConfig::default().to_json();
        assert_eq!(view["retry"]["base_backoff_ms"], 100);
        assert_eq!(view["circuit_breaker"]["reset_timeout_ms"], 30_000);
        assert_eq!(view["health_interval_ms"], 10_000);
        assert_eq!(view["health_check_timeout_ms"], 5_000);
    }
}
