//! In-process [`InferenceBackend`] used by unit and integration tests.
//!
//! Records every request it receives, answers unary calls with a small JSON
//! echo, and streams a configurable number of chunks.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use infergate_core::error::Result;
use infergate_core::{BackendMetrics, GatewayError, NodeInfo, RequestContext, StreamChunk};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use super::backend::{BackendRequest, BackendResponse, InferenceBackend};

/// Scriptable fake backend.
#[derive(Debug, Default)]
pub struct FakeBackend {
    nodes: Vec<NodeInfo>,
    chunks: u64,
    failure: Option<GatewayError>,
    /// Number of leading calls that fail; `None` fails every call.
    fail_limit: Option<u32>,
    attempts: AtomicU32,
    calls: Mutex<Vec<BackendRequest>>,
}

impl FakeBackend {
    /// Backend whose every call fails with a copy of `err`.
    #[must_use]
    pub fn failing(err: GatewayError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    /// Backend whose first `n` calls fail with a copy of `err`.
    #[must_use]
    pub fn failing_first(n: u32, err: GatewayError) -> Self {
        Self {
            failure: Some(err),
            fail_limit: Some(n),
            ..Self::default()
        }
    }

    /// Backend that streams `n` chunks per streaming call.
    #[must_use]
    pub fn with_chunks(n: u64) -> Self {
        Self {
            chunks: n,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendRequest> {
        self.calls.lock().clone()
    }

    /// Total calls attempted, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<()> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        match (&self.failure, self.fail_limit) {
            (Some(err), None) => Err(copy_error(err)),
            (Some(err), Some(limit)) if n < limit => Err(copy_error(err)),
            _ => Ok(()),
        }
    }
}

/// Copies kind, message, details, and retry hint. The source chain is not
/// carried over.
fn copy_error(err: &GatewayError) -> GatewayError {
    let mut copy = GatewayError::new(err.kind(), err.message());
    for (key, value) in err.details() {
        copy = copy.with_detail(key.clone(), value.clone());
    }
    if let Some(hint) = err.retry_hint() {
        copy = copy.with_retry_hint(hint);
    }
    copy
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.next_outcome()?;
        Ok(self.nodes.clone())
    }

    async fn metrics(&self) -> Result<BackendMetrics> {
        self.next_outcome()?;
        Ok(BackendMetrics {
            total_requests: u64::from(self.attempts()),
            nodes: self.nodes.len() as u64,
            ..BackendMetrics::default()
        })
    }

    async fn infer(&self, ctx: &RequestContext, request: BackendRequest) -> Result<BackendResponse> {
        self.calls.lock().push(request.clone());
        self.next_outcome()?;
        Ok(BackendResponse {
            result: json!({"task": request.task(), "correlation_id": ctx.correlation_id}),
            ..BackendResponse::default()
        })
    }

    async fn infer_stream(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        self.calls.lock().push(request);
        self.next_outcome()?;

        let (tx, rx) = mpsc::channel(4);
        let total = self.chunks;
        let correlation_id = ctx.correlation_id.clone();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            for seq in 0..total {
                let chunk = StreamChunk {
                    correlation_id: correlation_id.clone(),
                    is_final: seq + 1 == total,
                    seq,
                    total,
                    result: Bytes::from(format!("tok{seq}")),
                    ..StreamChunk::default()
                };
                tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = tx.send(chunk) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}
