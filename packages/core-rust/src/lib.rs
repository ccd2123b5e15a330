//! Infergate core: error taxonomy, data model, payload codecs, and call
//! resiliency primitives shared by the gateway server.

pub mod codec;
pub mod context;
pub mod error;
pub mod resilience;
pub mod types;

pub use codec::{Codec, CodecError, CodecRegistry, CodecValue};
pub use context::RequestContext;
pub use error::{ErrorAggregator, ErrorKind, GatewayError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use types::{
    BackendMetrics, ErrorBody, InferRequest, NodeInfo, ResponseEnvelope, StreamChunk,
};
