//! Retry + circuit breaker decorator for any [`InferenceBackend`].

use std::future::Future;

use async_trait::async_trait;
use infergate_core::error::Result;
use infergate_core::resilience::{retry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
use infergate_core::{BackendMetrics, ErrorKind, NodeInfo, RequestContext, StreamChunk};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::backend::{BackendRequest, BackendResponse, InferenceBackend};

/// Wraps a backend with one retry policy and exactly one circuit breaker.
///
/// Every attempt first asks the breaker for permission; an open breaker
/// fails the call with `Unavailable` and stops the retry loop. Streaming
/// calls are retried only until the stream is established. Client errors
/// (4xx kinds) and cancelled calls leave the breaker untouched.
pub struct ResilientBackend<B> {
    inner: B,
    policy: RetryPolicy,
    breaker: Mutex<CircuitBreaker>,
    /// Cancels retries for calls that carry no request context.
    background: CancellationToken,
}

impl<B: InferenceBackend> ResilientBackend<B> {
    #[must_use]
    pub fn new(inner: B, policy: RetryPolicy, breaker: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            policy,
            breaker: Mutex::new(CircuitBreaker::new(breaker)),
            background: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &B {
        &self.inner
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().state()
    }

    #[must_use]
    pub fn circuit_failures(&self) -> u32 {
        self.breaker.lock().failures()
    }

    /// Runs `op` under the retry policy, checking the breaker before and
    /// recording the outcome after every attempt. The breaker lock is never
    /// held across the call itself.
    async fn guarded<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry(cancel, &self.policy, |attempt| {
            let admitted = self.breaker.lock().try_acquire();
            let call = op();
            async move {
                // Retrying against an open breaker only burns the backoff.
                admitted.map_err(|err| err.with_retry_hint(false))?;
                let result = call.await;
                self.record(Outcome::of(&result, cancel), attempt);
                result
            }
        })
        .await
    }

    fn record(&self, outcome: Outcome, attempt: u32) {
        let mut breaker = self.breaker.lock();
        match outcome {
            Outcome::Success => {
                breaker.record_success();
                return;
            }
            Outcome::Ignored => return,
            Outcome::Failure => {}
        }
        let before = breaker.state();
        breaker.record_failure();
        if before != CircuitState::Open && breaker.state() == CircuitState::Open {
            metrics::counter!("infergate_circuit_open_total").increment(1);
            warn!(attempt, failures = breaker.failures(), "backend circuit opened");
        }
    }
}

/// How one attempt's result counts toward the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

impl Outcome {
    fn of<T>(result: &Result<T>, cancel: &CancellationToken) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(_) if cancel.is_cancelled() => Self::Ignored,
            Err(err) if is_client_error(err.kind()) => Self::Ignored,
            Err(_) => Self::Failure,
        }
    }
}

/// The backend answered, but the request itself was at fault.
fn is_client_error(kind: ErrorKind) -> bool {
    (400..500).contains(&kind.http_status())
}

#[async_trait]
impl<B: InferenceBackend> InferenceBackend for ResilientBackend<B> {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.guarded(&self.background, || self.inner.nodes()).await
    }

    async fn metrics(&self) -> Result<BackendMetrics> {
        self.guarded(&self.background, || self.inner.metrics()).await
    }

    async fn infer(&self, ctx: &RequestContext, request: BackendRequest) -> Result<BackendResponse> {
        self.guarded(&ctx.cancel, || self.inner.infer(ctx, request.clone()))
            .await
    }

    async fn infer_stream(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        self.guarded(&ctx.cancel, || self.inner.infer_stream(ctx, request.clone()))
            .await
    }
}

impl<B> Drop for ResilientBackend<B> {
    fn drop(&mut self) {
        self.background.cancel();
    }
}
