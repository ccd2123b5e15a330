//! Request ingestion: turns an HTTP request of any supported shape into a
//! canonical [`InferRequest`].
//!
//! | Content type | Payload | Service / task / metadata | Correlation ID |
//! |---|---|---|---|
//! | `multipart/form-data` | `payload` file field | form fields | `correlation_id` field |
//! | `application/octet-stream` | raw body | query parameters | `X-Correlation-ID` header |
//! | anything else | base64 `payload` in JSON body | JSON fields | `correlation_id` field |
//!
//! Every path falls back to the `X-Correlation-ID` header and then to a
//! fresh UUID v4 when no correlation ID is supplied.

use std::collections::HashMap;

use axum::body::to_bytes;
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use bytes::Bytes;
use infergate_core::error::Result;
use infergate_core::{GatewayError, InferRequest};
use serde_json::Value;
use tracing::debug;

pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// Normalizes `request` into an [`InferRequest`].
///
/// # Errors
///
/// Returns `Invalid` when the body cannot be read or parsed, or when no
/// service name is given.
pub async fn ingest(request: Request, body_limit: usize) -> Result<InferRequest> {
    let content_type = media_type(request.headers());
    let header_correlation = header_correlation_id(request.headers());

    let infer = match content_type.as_str() {
        "multipart/form-data" => from_multipart(request).await?,
        "application/octet-stream" => from_octet_stream(request, body_limit).await?,
        _ => from_json(request, body_limit).await?,
    };

    let infer = finalize(infer, header_correlation)?;

    debug!(
        service = %infer.service,
        correlation_id = %infer.correlation_id,
        payload_bytes = infer.payload.len(),
        content_type = %content_type,
        "request ingested"
    );
    Ok(infer)
}

/// Trims the service name, rejects a blank one, and fills in a missing
/// correlation ID from `fallback_correlation` or a fresh UUID v4.
///
/// # Errors
///
/// Returns `Invalid` when the service name is blank.
pub fn finalize(
    mut infer: InferRequest,
    fallback_correlation: Option<String>,
) -> Result<InferRequest> {
    infer.service = infer.service.trim().to_string();
    if infer.service.is_empty() {
        return Err(GatewayError::invalid("missing required field: service"));
    }
    if infer.correlation_id.trim().is_empty() {
        infer.correlation_id =
            fallback_correlation.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    }
    Ok(infer)
}

/// Lowercased media type without parameters; empty when absent.
fn media_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

fn header_correlation_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn read_body(request: Request, limit: usize) -> Result<Bytes> {
    to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| GatewayError::invalid("failed to read request body").with_source(e))
}

// ---------------------------------------------------------------------------
// multipart/form-data
// ---------------------------------------------------------------------------

async fn from_multipart(request: Request) -> Result<InferRequest> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| GatewayError::invalid("invalid multipart body").with_source(e))?;

    let mut infer = InferRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::invalid("invalid multipart field").with_source(e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let invalid_field = |e| {
            GatewayError::invalid(format!("failed to read multipart field {name}")).with_source(e)
        };
        match name.as_str() {
            "payload" => infer.payload = field.bytes().await.map_err(invalid_field)?,
            "service" => infer.service = field.text().await.map_err(invalid_field)?,
            "task" => {
                let task = field.text().await.map_err(invalid_field)?;
                infer.task = Some(task).filter(|t| !t.trim().is_empty());
            }
            "correlation_id" => infer.correlation_id = field.text().await.map_err(invalid_field)?,
            "metadata" => {
                let raw = field.text().await.map_err(invalid_field)?;
                infer.metadata = parse_metadata(&raw);
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }
    Ok(infer)
}

// ---------------------------------------------------------------------------
// application/octet-stream
// ---------------------------------------------------------------------------

async fn from_octet_stream(request: Request, limit: usize) -> Result<InferRequest> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map_err(|e| GatewayError::invalid("invalid query string").with_source(e))?;
    let payload = read_body(request, limit).await?;

    Ok(InferRequest {
        service: params.get("service").cloned().unwrap_or_default(),
        task: params.get("task").filter(|t| !t.trim().is_empty()).cloned(),
        payload,
        correlation_id: String::new(),
        metadata: params
            .get("metadata")
            .map(|raw| parse_metadata(raw))
            .unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

async fn from_json(request: Request, limit: usize) -> Result<InferRequest> {
    let body = read_body(request, limit).await?;
    from_json_value(serde_json::from_slice(&body)?)
}

/// Deserializes one canonical JSON request. Non-string metadata values are
/// stringified first.
///
/// # Errors
///
/// Returns `Invalid` unless `value` is an object of the canonical shape
/// with a base64 `payload`.
pub fn from_json_value(mut value: Value) -> Result<InferRequest> {
    let Some(object) = value.as_object_mut() else {
        return Err(GatewayError::invalid("request body must be a JSON object"));
    };
    if let Some(metadata) = object.get_mut("metadata") {
        *metadata = match metadata.take() {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::String(stringify(v))))
                    .collect(),
            ),
            Value::Null => Value::Object(serde_json::Map::new()),
            _ => return Err(GatewayError::invalid("metadata must be a JSON object")),
        };
    }
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Parses a JSON object of options. Malformed input yields empty metadata.
fn parse_metadata(raw: &str) -> HashMap<String, String> {
    if raw.trim().is_empty() {
        return HashMap::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map.into_iter().map(|(k, v)| (k, stringify(v))).collect(),
        _ => {
            debug!("ignoring malformed metadata");
            HashMap::new()
        }
    }
}

/// Strings pass through; everything else becomes its JSON text.
fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
