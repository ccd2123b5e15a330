//! [`InferenceBackend`] over HTTP: JSON for unary calls, SSE for streams.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Call | Request |
//! |---|---|
//! | `nodes` | `GET /v1/nodes` |
//! | `metrics` | `GET /v1/metrics` |
//! | `infer` | `POST /v1/infer` |
//! | `infer_stream` | `POST /v1/infer/stream` (`text/event-stream` response) |

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use infergate_core::error::Result;
use infergate_core::{
    BackendMetrics, ErrorBody, ErrorKind, GatewayError, NodeInfo, RequestContext, StreamChunk,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::backend::{BackendRequest, BackendResponse, InferenceBackend};
use crate::stream::{SseDecoder, WireChunk, TEXT_EVENT_STREAM};

/// HTTP client for a remote inference backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
    stream_capacity: usize,
}

impl HttpBackend {
    /// Creates a client for `base_url`.
    ///
    /// `timeout` bounds each unary call; streams are bounded only by
    /// cancellation so long generations are not cut off.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for an unparseable base URL and `Internal` if the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, stream_capacity: usize) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            GatewayError::invalid(format!("invalid backend URL: {base_url}")).with_source(e)
        })?;
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| GatewayError::internal("failed to build HTTP client").with_source(e))?;
        Ok(Self {
            client,
            base_url,
            timeout,
            stream_capacity: stream_capacity.max(1),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(response).await)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.get(self.url(path)).timeout(self.timeout);
        let response = self.send(request).await?;
        response.json().await.map_err(transport_error)
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.get_json("/v1/nodes").await
    }

    async fn metrics(&self) -> Result<BackendMetrics> {
        self.get_json("/v1/metrics").await
    }

    async fn infer(&self, ctx: &RequestContext, request: BackendRequest) -> Result<BackendResponse> {
        let builder = self
            .client
            .post(self.url("/v1/infer"))
            .timeout(self.timeout)
            .header("x-correlation-id", &ctx.correlation_id)
            .json(&request);

        let call = async {
            let response = self.send(builder).await?;
            response.json::<BackendResponse>().await.map_err(transport_error)
        };
        tokio::select! {
            () = ctx.cancel.cancelled() => Err(cancelled()),
            result = call => result,
        }
    }

    async fn infer_stream(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let builder = self
            .client
            .post(self.url("/v1/infer/stream"))
            .header("x-correlation-id", &ctx.correlation_id)
            .header(reqwest::header::ACCEPT, TEXT_EVENT_STREAM)
            .json(&request);

        let response = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(cancelled()),
            response = self.send(builder) => response?,
        };

        let (tx, rx) = mpsc::channel(self.stream_capacity);
        let cancel = ctx.cancel.clone();
        let correlation_id = ctx.correlation_id.clone();
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(%correlation_id, "backend stream cancelled");
                        return;
                    }
                    next = body.next() => next,
                };
                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(err)) => {
                        warn!(%correlation_id, error = %err, "backend stream read failed");
                        return;
                    }
                    None => return,
                };
                let events = match decoder.push(&bytes) {
                    Ok(events) => events,
                    Err(err) => {
                        warn!(%correlation_id, error = %err, "backend stream event rejected");
                        return;
                    }
                };
                for data in events {
                    if data.trim() == "[DONE]" {
                        return;
                    }
                    let chunk = match serde_json::from_str::<WireChunk>(&data)
                        .map_err(GatewayError::from)
                        .and_then(WireChunk::into_chunk)
                    {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            warn!(%correlation_id, error = %err, "malformed backend stream chunk");
                            return;
                        }
                    };
                    let is_final = chunk.is_final;
                    if tx.send(chunk).await.is_err() || is_final {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn cancelled() -> GatewayError {
    GatewayError::new(ErrorKind::RequestFailed, "request cancelled").with_retry_hint(false)
}

/// Maps a reqwest failure that produced no HTTP status.
fn transport_error(err: reqwest::Error) -> GatewayError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::ConnectionFailed
    } else if err.is_decode() || err.is_body() {
        ErrorKind::ResponseFailed
    } else {
        ErrorKind::RequestFailed
    };
    let mut mapped = GatewayError::new(kind, format!("backend call failed: {err}"));
    if let Some(url) = err.url() {
        mapped = mapped.with_detail("url", url.as_str());
    }
    mapped.with_source(err)
}

/// Default kind for a non-success backend status.
fn status_kind(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Invalid,
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::Unavailable,
        StatusCode::SERVICE_UNAVAILABLE => ErrorKind::ServiceUnavailable,
        s if s.is_server_error() => ErrorKind::RequestFailed,
        _ => ErrorKind::ResponseFailed,
    }
}

/// Builds an error from a non-success response. A structured error body
/// (bare or inside an envelope's `error` field) supplies kind and message.
async fn status_error(response: Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = parse_error_body(&body);

    let kind = parsed
        .as_ref()
        .and_then(|b| serde_json::from_value(serde_json::Value::String(b.code.clone())).ok())
        .unwrap_or_else(|| status_kind(status));
    let message = parsed.map_or_else(
        || format!("backend returned {status}"),
        |b| b.message,
    );

    let err = GatewayError::new(kind, message).with_detail("status", status.as_u16());
    if status == StatusCode::BAD_GATEWAY {
        err.with_retry_hint(true)
    } else {
        err
    }
}

fn parse_error_body(body: &str) -> Option<ErrorBody> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    serde_json::from_str::<Envelope>(body)
        .map(|e| e.error)
        .or_else(|_| serde_json::from_str::<ErrorBody>(body))
        .ok()
}
