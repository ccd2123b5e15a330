//! Inference endpoints: single requests (`POST /v1/infer`) and unary
//! batches (`POST /v1/infer/batch`).
//!
//! Envelopes carry the request's correlation ID as `request_id` once it is
//! known; failures before that point fall back to the `X-Request-Id`.

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::future::join_all;
use infergate_core::error::Result;
use infergate_core::{ErrorAggregator, GatewayError, RequestContext, ResponseEnvelope};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{error_response, ok_response, request_id, AppState};
use crate::ingest::{finalize, from_json_value, ingest};
use crate::service::handlers::ServiceOutput;
use crate::service::router::normalize;
use crate::stream::sse_response_holding;

/// `POST /v1/infer`: ingest, route, and answer with an envelope or an SSE
/// stream.
///
/// Streaming responses keep the request counted as in flight until the
/// client has received the last frame or gone away.
pub async fn infer_handler(State(state): State<AppState>, request: Request) -> Response {
    let request_id = request_id(request.headers());

    let guard = match state.shutdown.admit() {
        Ok(guard) => guard,
        Err(err) => return error_response(request_id, &err),
    };

    let infer = match ingest(request, state.config.body_limit).await {
        Ok(infer) => infer,
        Err(err) => {
            debug!(request_id = %request_id, error = %err, "request rejected at ingestion");
            return error_response(request_id, &err);
        }
    };

    let correlation_id = infer.correlation_id.clone();
    let service = normalize(&infer.service);
    let ctx = RequestContext::new(correlation_id.clone())
        .with_request_id(request_id)
        .with_parent(&state.shutdown.token());

    match state.router.route(&ctx, infer).await {
        Ok(ServiceOutput::Unary(data)) => ok_response(correlation_id, data),
        Ok(ServiceOutput::Stream(rx)) => {
            sse_response_holding(rx, ctx.cancel.clone(), service, guard)
        }
        Err(err) => error_response(correlation_id, &err),
    }
}

/// `POST /v1/infer/batch`: a JSON array of canonical requests, run
/// concurrently.
///
/// Answers with an envelope whose `data` holds one envelope per item, in
/// input order. When every item fails, answers with a single error
/// envelope aggregating the failures instead.
pub async fn batch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);

    let _guard = match state.shutdown.admit() {
        Ok(guard) => guard,
        Err(err) => return error_response(request_id, &err),
    };

    let items = match parse_batch(&body, state.gateway.max_batch_size) {
        Ok(items) => items,
        Err(err) => return error_response(request_id, &err),
    };

    let parent = state.shutdown.token();
    let total = items.len();
    let outcomes = join_all(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| run_item(&state, &parent, index, item)),
    )
    .await;

    let mut failures = ErrorAggregator::new("batch");
    let mut envelopes = Vec::with_capacity(total);
    for (correlation_id, outcome) in outcomes {
        match outcome {
            Ok(data) => envelopes.push(ResponseEnvelope::ok(correlation_id, data)),
            Err(err) => {
                envelopes.push(ResponseEnvelope::err(correlation_id, &err));
                failures.push(err);
            }
        }
    }

    let failed = failures.len();
    info!(request_id = %request_id, total, failed, "batch completed");

    if failed == total {
        if let Err(err) = failures.into_result() {
            warn!(request_id = %request_id, error = %err, "every batch item failed");
            return error_response(request_id, &err);
        }
    }
    ok_response(request_id, serde_json::json!(envelopes))
}

fn parse_batch(body: &[u8], max_batch_size: usize) -> Result<Vec<Value>> {
    let items = match serde_json::from_slice::<Value>(body)? {
        Value::Array(items) => items,
        _ => return Err(GatewayError::invalid("batch body must be a JSON array")),
    };
    if items.is_empty() {
        return Err(GatewayError::invalid("batch must contain at least one request"));
    }
    if items.len() > max_batch_size {
        return Err(GatewayError::invalid("batch too large")
            .with_detail("size", items.len())
            .with_detail("max_batch_size", max_batch_size));
    }
    Ok(items)
}

/// Runs one batch item. Returns its correlation ID (empty if the item could
/// not be parsed) alongside the outcome.
async fn run_item(
    state: &AppState,
    parent: &CancellationToken,
    index: usize,
    item: Value,
) -> (String, Result<Value>) {
    let infer = match from_json_value(item).and_then(|infer| finalize(infer, None)) {
        Ok(infer) => infer,
        Err(err) => return (String::new(), Err(err.with_detail("index", index))),
    };
    let correlation_id = infer.correlation_id.clone();

    if state.router.is_streaming(&infer.service) {
        let err = GatewayError::invalid(format!(
            "streaming service {} cannot be used in a batch",
            infer.service
        ))
        .with_detail("index", index);
        return (correlation_id, Err(err));
    }

    let ctx = RequestContext::new(correlation_id.clone()).with_parent(parent);
    let outcome = match state.router.route(&ctx, infer).await {
        Ok(ServiceOutput::Unary(data)) => Ok(data),
        Ok(ServiceOutput::Stream(_)) => Err(GatewayError::internal(
            "unary service produced a stream",
        )),
        Err(err) => Err(err.with_detail("index", index)),
    };
    (correlation_id, outcome)
}
