//! Periodic health checking of gateway dependencies.
//!
//! - [`HealthChecker`]: one named probe
//! - [`HealthMonitor`]: runs all registered probes concurrently on an interval
//! - [`CompositeChecker`]: rolls several probes into one
//! - [`BackendChecker`], [`CircuitChecker`]: probes for the inference backend

pub mod checkers;
pub mod monitor;

pub use checkers::{BackendChecker, CircuitChecker, CompositeChecker};
pub use monitor::HealthMonitor;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    /// Milliseconds since the Unix epoch when the check finished.
    pub timestamp: u64,
    /// Time the check took.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl HealthCheckResult {
    #[must_use]
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    #[must_use]
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp: infergate_core::types::now_millis(),
            duration: Duration::ZERO,
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A named health probe.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the probe. Failures are reported as an `Unhealthy` result, not
    /// as an error.
    ///
    /// `cancel` fires when the monitor's deadline for this check passes or
    /// the monitor stops; work the probe spawned should end with it.
    async fn check(&self, cancel: &CancellationToken) -> HealthCheckResult;
}
