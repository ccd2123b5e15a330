//! Circuit breaker guarding a single remote dependency.
//!
//! State machine: Closed -> Open -> HalfOpen -> Closed. Transitions depend
//! only on call outcomes and elapsed time.
//!
//! A breaker is owned by exactly one call site and mutated through
//! `&mut self`. Callers that must share one between tasks put it behind a
//! mutex and use the split [`CircuitBreaker::try_acquire`] /
//! [`CircuitBreaker::record_success`] / [`CircuitBreaker::record_failure`]
//! API so the lock is never held across the protected call.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::GatewayError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through normally.
    Closed,
    /// Calls fail fast without reaching the dependency.
    Open,
    /// The reset timeout elapsed; the next call probes the dependency.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Time after the last failure before a probe call is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decides whether a call may proceed.
    ///
    /// An open breaker whose reset timeout has elapsed moves to `HalfOpen`
    /// and lets the call through.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` while the breaker is open.
    pub fn try_acquire(&mut self) -> Result<(), GatewayError> {
        if self.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = self
            .last_failure
            .map_or(self.config.reset_timeout, |at| at.elapsed());
        if elapsed >= self.config.reset_timeout {
            self.state = CircuitState::HalfOpen;
            info!(failures = self.failures, "circuit half-open, probing dependency");
            return Ok(());
        }

        let remaining = self.config.reset_timeout.saturating_sub(elapsed);
        #[allow(clippy::cast_possible_truncation)]
        let retry_after_ms = remaining.as_millis() as u64;
        Err(GatewayError::unavailable("circuit breaker is open")
            .with_detail("retry_after_ms", retry_after_ms)
            .with_detail("failures", self.failures))
    }

    /// Records a successful call: the failure counter resets and a
    /// half-open breaker closes.
    pub fn record_success(&mut self) {
        self.failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
            info!("circuit closed after successful probe");
        }
    }

    /// Records a failed call, opening the breaker once the threshold is
    /// reached (from any state).
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(Instant::now());
        if self.failures >= self.config.max_failures && self.state != CircuitState::Open {
            self.state = CircuitState::Open;
            warn!(failures = self.failures, "circuit opened");
        }
    }

    /// Runs `f` under the breaker.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` without calling `f` while open; otherwise
    /// returns `f`'s own error.
    pub async fn execute<T, F, Fut>(&mut self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.try_acquire()?;
        let result = f().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Forces the breaker back to `Closed` with a zero failure count.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.last_failure = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
