use tokio_util::sync::CancellationToken;

/// Per-request context threaded from the HTTP handler through the router and
/// into the backend client.
///
/// Cancelling `cancel` aborts retry backoffs, backend calls, and stream
/// production for this request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation identifier echoed in every response and stream chunk.
    pub correlation_id: String,
    /// Value of the `x-request-id` header assigned at the HTTP edge, if any.
    pub request_id: Option<String>,
    /// Cancelled when the client goes away or the server shuts down.
    pub cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            request_id: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Derives the cancellation token from `parent`, so cancelling the
    /// parent also cancels this request.
    #[must_use]
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
