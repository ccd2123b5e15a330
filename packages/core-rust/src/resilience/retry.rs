//! Retry executor with exponential backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorKind, GatewayError};

const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "connection refused",
    "network unreachable",
    "connection reset",
    "connection timed out",
    "dns",
];

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Immutable retry configuration for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// When `false` the operation runs exactly once.
    pub enabled: bool,
    /// Total number of calls, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays; expected to be > 1.
    pub multiplier: f64,
    /// No new attempt starts if its delay would push past this budget.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt:
    /// `base * multiplier^(attempt - 1)`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Capability an error type exposes to the retry executor.
///
/// Both methods are optional; an error that answers neither is classified by
/// scanning its `Display` text for transient-network keywords.
pub trait RetryClassify: fmt::Display {
    /// Explicit retry decision, taking precedence over everything else.
    fn should_retry(&self) -> Option<bool> {
        None
    }

    /// Taxonomy kind, if the error has one.
    fn error_kind(&self) -> Option<ErrorKind> {
        None
    }
}

impl RetryClassify for GatewayError {
    fn should_retry(&self) -> Option<bool> {
        self.retry_hint()
    }

    fn error_kind(&self) -> Option<ErrorKind> {
        Some(self.kind())
    }
}

impl RetryClassify for std::io::Error {
    fn error_kind(&self) -> Option<ErrorKind> {
        use std::io::ErrorKind as Io;
        match self.kind() {
            Io::TimedOut => Some(ErrorKind::Timeout),
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected => Some(ErrorKind::ConnectionFailed),
            Io::PermissionDenied => Some(ErrorKind::Forbidden),
            Io::InvalidInput | Io::InvalidData => Some(ErrorKind::Invalid),
            _ => None,
        }
    }
}

/// Decides whether a failed call is worth repeating.
///
/// Order: explicit hint, then known kinds (Timeout, Unavailable,
/// ConnectionFailed, ServiceUnavailable retry; Internal, Invalid,
/// Unauthorized, Forbidden do not), then a keyword scan of the message.
pub fn is_retryable<E: RetryClassify + ?Sized>(err: &E) -> bool {
    if let Some(decision) = err.should_retry() {
        return decision;
    }
    match err.error_kind() {
        Some(
            ErrorKind::Timeout
            | ErrorKind::Unavailable
            | ErrorKind::ConnectionFailed
            | ErrorKind::ServiceUnavailable,
        ) => return true,
        Some(
            ErrorKind::Internal
            | ErrorKind::Invalid
            | ErrorKind::Unauthorized
            | ErrorKind::Forbidden,
        ) => return false,
        _ => {}
    }
    let text = err.to_string().to_ascii_lowercase();
    RETRYABLE_KEYWORDS.iter().any(|k| text.contains(k))
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs `op` under `policy`, sleeping between attempts.
///
/// `op` receives the 1-based attempt number. Backoff sleeps race against
/// `cancel`; when it fires the last error is returned immediately. When
/// attempts or the elapsed budget run out, the last error is returned
/// unchanged.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify,
{
    if !policy.enabled {
        return op(1).await;
    }

    let max_attempts = policy.max_attempts.max(1);
    let started = Instant::now();
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts || !is_retryable(&err) {
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        if started.elapsed() + delay > policy.max_elapsed {
            debug!(attempt, error = %err, "retry budget exhausted");
            return Err(err);
        }

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        debug!(attempt, delay_ms, error = %err, "retrying after backoff");

        tokio::select! {
            () = cancel.cancelled() => {
                debug!(attempt, "retry cancelled during backoff");
                return Err(err);
            }
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// A [`RetryPolicy`] bound to the call site that owns it.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// See [`retry`].
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn execute<T, E, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassify,
    {
        retry(cancel, &self.policy, op).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
