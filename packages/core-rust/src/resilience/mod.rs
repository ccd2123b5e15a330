//! Call-resiliency primitives.
//!
//! - [`retry`]: exponential backoff with retryable-error classification
//! - [`circuit_breaker`]: Closed/Open/HalfOpen guard for one dependency
//!
//! Neither type holds shared state. Each protected dependency owns its own
//! executor and breaker; sharing a breaker across tasks requires wrapping
//! it in a mutex.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{is_retryable, retry, RetryClassify, RetryExecutor, RetryPolicy};
