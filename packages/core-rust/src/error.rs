//! Error taxonomy shared by every gateway component.
//!
//! A [`GatewayError`] carries a machine-readable [`ErrorKind`], a human
//! message, optional structured details, and an optional wrapped cause so
//! callers can walk the chain with [`std::error::Error::source`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed cause stored inside a [`GatewayError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classification of a gateway failure.
///
/// The first seven kinds are generic; the rest are specific to inference
/// routing. The serialized form (`SCREAMING_SNAKE_CASE`) is what clients see
/// in the `error.code` field of a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Internal,
    Invalid,
    Timeout,
    Unavailable,
    NotFound,
    Unauthorized,
    Forbidden,
    NodeNotFound,
    ServiceUnavailable,
    TaskUnsupported,
    UnsupportedService,
    CodecMismatch,
    DiscoveryFailed,
    ConnectionFailed,
    RequestFailed,
    ResponseFailed,
}

impl ErrorKind {
    /// Wire code for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::Invalid => "INVALID",
            Self::Timeout => "TIMEOUT",
            Self::Unavailable => "UNAVAILABLE",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NodeNotFound => "NODE_NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::TaskUnsupported => "TASK_UNSUPPORTED",
            Self::UnsupportedService => "UNSUPPORTED_SERVICE",
            Self::CodecMismatch => "CODEC_MISMATCH",
            Self::DiscoveryFailed => "DISCOVERY_FAILED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::ResponseFailed => "RESPONSE_FAILED",
        }
    }

    /// HTTP status code used when this kind reaches the REST boundary.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Invalid
            | Self::TaskUnsupported
            | Self::UnsupportedService
            | Self::CodecMismatch => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound | Self::NodeNotFound => 404,
            Self::ConnectionFailed
            | Self::RequestFailed
            | Self::ResponseFailed
            | Self::DiscoveryFailed => 502,
            Self::Unavailable | Self::ServiceUnavailable => 503,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Structured error returned by every fallible gateway operation.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    kind: ErrorKind,
    message: String,
    details: BTreeMap<String, Value>,
    #[source]
    source: Option<BoxError>,
    retry_hint: Option<bool>,
}

impl GatewayError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
            source: None,
            retry_hint: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Error for a service name that has no dispatch entry. The message
    /// always contains the name exactly as the caller supplied it.
    pub fn unsupported_service(name: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedService,
            format!("unsupported service: {name}"),
        )
        .with_detail("service", name)
    }

    /// Attaches a structured detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Overrides retry classification for this particular error.
    #[must_use]
    pub fn with_retry_hint(mut self, retry: bool) -> Self {
        self.retry_hint = Some(retry);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    #[must_use]
    pub fn retry_hint(&self) -> Option<bool> {
        self.retry_hint
    }

    /// Returns `true` if this error or any `GatewayError` in its cause chain
    /// has the given kind.
    #[must_use]
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        if self.kind == kind {
            return true;
        }
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            if let Some(gw) = err.downcast_ref::<GatewayError>() {
                if gw.kind == kind {
                    return true;
                }
            }
            cause = err.source();
        }
        false
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid(format!("malformed JSON: {err}")).with_source(err)
    }
}

// ---------------------------------------------------------------------------
// ErrorAggregator
// ---------------------------------------------------------------------------

/// Collects failures from a batch of independent operations so they can be
/// reported together instead of failing on the first one.
#[derive(Debug)]
pub struct ErrorAggregator {
    context: String,
    errors: Vec<GatewayError>,
}

impl ErrorAggregator {
    #[must_use]
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, err: GatewayError) {
        self.errors.push(err);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Folds the collected errors into a single result.
    ///
    /// A lone error is returned unchanged. Several errors become one error
    /// whose kind is their shared kind (or `Internal` when they differ) and
    /// whose `errors` detail lists every `{code, message}` pair.
    ///
    /// # Errors
    ///
    /// Returns the aggregated error when at least one failure was pushed.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            n => {
                let first = self.errors[0].kind;
                let kind = if self.errors.iter().all(|e| e.kind == first) {
                    first
                } else {
                    ErrorKind::Internal
                };
                let listed: Vec<Value> = self
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "code": e.kind.as_str(), "message": e.message }))
                    .collect();
                Err(
                    GatewayError::new(kind, format!("{}: {n} errors occurred", self.context))
                        .with_detail("errors", Value::Array(listed)),
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = GatewayError::timeout("backend did not answer");
        assert_eq!(err.to_string(), "TIMEOUT: backend did not answer");
    }

    #[test]
    fn unsupported_service_names_the_service() {
        let err = GatewayError::unsupported_service("no_such_service");
        assert_eq!(err.kind(), ErrorKind::UnsupportedService);
        assert!(err.message().contains("no_such_service"));
        assert_eq!(err.details()["service"], "no_such_service");
    }

    #[test]
    fn source_chain_is_walkable() {
        let inner = GatewayError::new(ErrorKind::ConnectionFailed, "refused");
        let outer = GatewayError::internal("call failed").with_source(inner);

        assert!(outer.has_kind(ErrorKind::ConnectionFailed));
        assert!(!outer.has_kind(ErrorKind::Forbidden));
        let cause = std::error::Error::source(&outer).unwrap();
        assert_eq!(cause.to_string(), "CONNECTION_FAILED: refused");
    }

    #[test]
    fn kind_serializes_as_wire_code() {
        let json = serde_json::to_string(&ErrorKind::NodeNotFound).unwrap();
        assert_eq!(json, "\"NODE_NOT_FOUND\"");
        assert_eq!(ErrorKind::NodeNotFound.as_str(), "NODE_NOT_FOUND");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorKind::Invalid.http_status(), 400);
        assert_eq!(ErrorKind::UnsupportedService.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Unavailable.http_status(), 503);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn aggregator_empty_is_ok() {
        assert!(ErrorAggregator::new("batch").into_result().is_ok());
    }

    #[test]
    fn aggregator_single_error_passes_through() {
        let mut agg = ErrorAggregator::new("batch");
        agg.push(GatewayError::invalid("bad item"));
        let err = agg.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.message(), "bad item");
    }

    #[test]
    fn aggregator_reports_all_errors() {
        let mut agg = ErrorAggregator::new("batch");
        agg.push(GatewayError::invalid("first"));
        agg.push(GatewayError::timeout("second"));
        assert_eq!(agg.len(), 2);

        let err = agg.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "batch: 2 errors occurred");
        let listed = err.details()["errors"].as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1]["code"], "TIMEOUT");
    }

    #[test]
    fn aggregator_keeps_shared_kind() {
        let mut agg = ErrorAggregator::new("batch");
        agg.push(GatewayError::invalid("a"));
        agg.push(GatewayError::invalid("b"));
        assert_eq!(agg.into_result().unwrap_err().kind(), ErrorKind::Invalid);
    }
}
