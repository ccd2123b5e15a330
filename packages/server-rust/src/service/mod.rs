//! Inference service layer.
//!
//! 1. **Routing** (`router`): dispatch by service name to a handler
//! 2. **Handlers** (`handlers`): payload normalization and typed backend requests
//! 3. **Backends** (`backend`, `http_backend`, `resilient`): the backend
//!    contract, its HTTP implementation, and the retry + breaker decorator

pub mod backend;
pub mod config;
pub mod handlers;
pub mod http_backend;
pub mod options;
pub mod resilient;
pub mod router;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backend::{BackendRequest, BackendResponse, InferenceBackend};
pub use config::GatewayConfig;
pub use handlers::{HandlerDeps, ServiceHandler, ServiceOutput};
pub use router::{service_names, ServiceRouter};
