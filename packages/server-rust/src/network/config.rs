//! Network configuration types for the gateway's HTTP listener.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};

/// Top-level network configuration for the gateway.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to produce response headers. Streamed bodies are not
    /// bounded by it once headers are sent.
    pub request_timeout: Duration,
    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,
    /// Maximum time to wait for in-flight requests during shutdown.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            body_limit: 32 * 1024 * 1024, // 32 MB
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkConfig {
    /// Non-secret view served by `GET /v1/config`. TLS key paths are
    /// reduced to an on/off flag.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_json(&self) -> Value {
        json!({
            "host": self.host,
            "port": self.port,
            "tls": self.tls.is_some(),
            "cors_origins": self.cors_origins,
            "request_timeout_ms": self.request_timeout.as_millis() as u64,
            "body_limit": self.body_limit,
            "drain_timeout_ms": self.drain_timeout.as_millis() as u64,
        })
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file.
    pub cert_path: PathBuf,
    /// Path to the TLS private key file.
    pub key_path: PathBuf,
}
