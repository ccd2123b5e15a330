use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Canonical inference request produced by the ingestor.
///
/// On the JSON wire `payload` is a base64 string; it is decoded into raw
/// bytes during deserialization and re-encoded on serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferRequest {
    /// Logical service name used for dispatch. Never empty after ingestion.
    #[serde(default)]
    pub service: String,
    /// Optional model or task identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Raw request payload.
    #[serde(default, with = "base64_bytes")]
    pub payload: Bytes,
    /// Opaque tracing token. Generated by the ingestor when absent.
    #[serde(default, alias = "correlationID", alias = "correlationId")]
    pub correlation_id: String,
    /// Free-form string options.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One unit of a streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub correlation_id: String,
    /// `true` only on the last chunk of a stream.
    pub is_final: bool,
    /// Position in the stream, starting at 0.
    pub seq: u64,
    /// Expected chunk count, 0 if unknown.
    pub total: u64,
    pub meta: HashMap<String, String>,
    pub result: Bytes,
}

/// Error section of a [`ResponseEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        let details = if err.details().is_empty() {
            None
        } else {
            serde_json::to_value(err.details()).ok()
        };
        Self {
            code: err.kind().as_str().to_string(),
            message: err.message().to_string(),
            details,
        }
    }
}

/// Uniform REST response wrapper. Exactly one of `data` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub request_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: request_id.into(),
            timestamp: now_millis(),
        }
    }

    #[must_use]
    pub fn err(request_id: impl Into<String>, error: &GatewayError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(error)),
            request_id: request_id.into(),
            timestamp: now_millis(),
        }
    }
}

/// Description of a backend compute node, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub load: f64,
}

/// Aggregate counters reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendMetrics {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub failed_requests: u64,
    #[serde(default)]
    pub active_streams: u64,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub nodes: u64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serde adapter carrying `Bytes` as a standard base64 string.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.trim())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
