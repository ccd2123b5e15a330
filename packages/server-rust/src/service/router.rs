//! Service routing: dispatches `InferRequest`s to handlers by service name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use infergate_core::error::Result;
use infergate_core::{GatewayError, InferRequest, RequestContext};
use tracing::{debug, info_span, Instrument};

use super::handlers::{
    ChatHandler, CompletionHandler, EmbeddingHandler, HandlerDeps, ImageClassificationHandler,
    ServiceHandler, ServiceOutput,
};

/// Built-in service names.
pub mod service_names {
    pub const EMBEDDING: &str = "embedding";
    pub const COMPLETION: &str = "completion";
    pub const COMPLETION_STREAM: &str = "completion_stream";
    pub const CHAT: &str = "chat";
    pub const CHAT_STREAM: &str = "chat_stream";
    pub const IMAGE_CLASSIFICATION: &str = "image_classification";
}

/// Canonical form of a service name: trimmed and lowercased.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// ServiceRouter
// ---------------------------------------------------------------------------

/// Routes requests to the handler registered for their service name.
///
/// The dispatch table is fixed once the router is built and shared behind
/// an `Arc`; lookups take no lock. Streaming services are separate entries
/// (e.g., `chat` and `chat_stream`).
#[derive(Default)]
pub struct ServiceRouter {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl ServiceRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a router from an explicit name -> handler map. Names are
    /// normalized; on a collision after normalization the later entry wins.
    #[must_use]
    pub fn from_handlers(handlers: HashMap<String, Arc<dyn ServiceHandler>>) -> Self {
        Self {
            handlers: handlers
                .into_iter()
                .map(|(name, handler)| (normalize(&name), handler))
                .collect(),
        }
    }

    /// Router with the six built-in services.
    #[must_use]
    pub fn standard(deps: &HandlerDeps) -> Self {
        use service_names::{
            CHAT, CHAT_STREAM, COMPLETION, COMPLETION_STREAM, EMBEDDING, IMAGE_CLASSIFICATION,
        };

        let mut handlers: HashMap<String, Arc<dyn ServiceHandler>> = HashMap::new();
        handlers.insert(EMBEDDING.into(), Arc::new(EmbeddingHandler::new(deps.clone())));
        handlers.insert(COMPLETION.into(), Arc::new(CompletionHandler::new(deps.clone(), false)));
        handlers.insert(
            COMPLETION_STREAM.into(),
            Arc::new(CompletionHandler::new(deps.clone(), true)),
        );
        handlers.insert(CHAT.into(), Arc::new(ChatHandler::new(deps.clone(), false)));
        handlers.insert(CHAT_STREAM.into(), Arc::new(ChatHandler::new(deps.clone(), true)));
        handlers.insert(
            IMAGE_CLASSIFICATION.into(),
            Arc::new(ImageClassificationHandler::new(deps.clone())),
        );
        Self::from_handlers(handlers)
    }

    /// Registers `handler` under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for a blank name or one that is already taken.
    pub fn register(&mut self, name: &str, handler: Arc<dyn ServiceHandler>) -> Result<()> {
        let key = normalize(name);
        if key.is_empty() {
            return Err(GatewayError::invalid("service name must not be empty"));
        }
        if self.handlers.contains_key(&key) {
            return Err(GatewayError::invalid(format!("service {key} is already registered"))
                .with_detail("service", key));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn handler(&self, service: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(&normalize(service)).cloned()
    }

    /// `true` if `service` is registered and streams its results.
    #[must_use]
    pub fn is_streaming(&self, service: &str) -> bool {
        self.handler(service).is_some_and(|h| h.is_streaming())
    }

    /// Dispatches `request` to its service handler.
    ///
    /// Backend errors pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedService` naming the requested service when no
    /// handler is registered for it; otherwise the handler's own error.
    pub async fn route(&self, ctx: &RequestContext, request: InferRequest) -> Result<ServiceOutput> {
        let key = normalize(&request.service);
        let Some(handler) = self.handlers.get(&key).cloned() else {
            debug!(service = %request.service, "no handler for service");
            metrics::counter!(
                "infergate_requests_total",
                "service" => "unknown",
                "outcome" => "unsupported"
            )
            .increment(1);
            return Err(GatewayError::unsupported_service(&request.service));
        };

        let span = info_span!(
            "route",
            service = %key,
            correlation_id = %ctx.correlation_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = handler.handle(ctx, request).await;
            let elapsed = start.elapsed();

            let outcome = match &result {
                Ok(ServiceOutput::Unary(_)) => "ok",
                Ok(ServiceOutput::Stream(_)) => "stream",
                Err(_) => "error",
            };

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = elapsed.as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);

            match &result {
                Ok(_) => tracing::info!(duration_ms, outcome, "request routed"),
                Err(err) => tracing::warn!(duration_ms, error = %err, "request failed"),
            }

            metrics::counter!(
                "infergate_requests_total",
                "service" => key.clone(),
                "outcome" => outcome
            )
            .increment(1);
            metrics::histogram!("infergate_request_duration_seconds", "service" => key)
                .record(elapsed.as_secs_f64());

            result
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRouter")
            .field("services", &self.services())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use infergate_core::{CodecRegistry, ErrorKind};
    use serde_json::json;

    use super::*;
    use crate::service::backend::BackendRequest;
    use crate::service::testing::FakeBackend;

    fn router_with(backend: Arc<FakeBackend>) -> ServiceRouter {
        let deps = HandlerDeps::new(backend, Arc::new(CodecRegistry::with_defaults()));
        ServiceRouter::standard(&deps)
    }

    fn request(service: &str, payload: &'static [u8]) -> InferRequest {
        InferRequest {
            service: service.to_string(),
            payload: Bytes::from_static(payload),
            correlation_id: "corr-1".to_string(),
            ..InferRequest::default()
        }
    }

    #[test]
    fn standard_router_lists_builtin_services() {
        let router = router_with(Arc::new(FakeBackend::default()));
        assert_eq!(
            router.services(),
            vec![
                "chat",
                "chat_stream",
                "completion",
                "completion_stream",
                "embedding",
                "image_classification",
            ]
        );
        assert!(router.is_streaming("chat_stream"));
        assert!(!router.is_streaming("chat"));
        assert!(!router.is_streaming("nope"));
    }

    #[tokio::test]
    async fn lookup_is_case_and_whitespace_insensitive() {
        let backend = Arc::new(FakeBackend::default());
        let router = router_with(Arc::clone(&backend));
        let ctx = RequestContext::new("corr-1");

        let out = router
            .route(&ctx, request("  Embedding ", b"[\"a\", \"b\"]"))
            .await
            .unwrap();
        assert!(matches!(out, ServiceOutput::Unary(_)));

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let BackendRequest::Embedding(typed) = &calls[0] else {
            panic!("expected embedding request");
        };
        assert_eq!(typed.inputs, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_service_is_unsupported_and_named() {
        let router = router_with(Arc::new(FakeBackend::default()));
        let err = router
            .route(&RequestContext::new("c"), request("translate", b"hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedService);
        assert!(err.message().contains("translate"));
    }

    #[tokio::test]
    async fn stream_suffix_is_not_inferred() {
        let mut handlers: HashMap<String, Arc<dyn ServiceHandler>> = HashMap::new();
        let deps = HandlerDeps::new(
            Arc::new(FakeBackend::default()),
            Arc::new(CodecRegistry::with_defaults()),
        );
        handlers.insert("chat".into(), Arc::new(ChatHandler::new(deps, false)));
        let router = ServiceRouter::from_handlers(handlers);

        let err = router
            .route(&RequestContext::new("c"), request("chat_stream", b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedService);
    }

    #[tokio::test]
    async fn backend_errors_pass_through_verbatim() {
        let backend = Arc::new(FakeBackend::failing(
            GatewayError::new(ErrorKind::NodeNotFound, "no node serves bert").with_detail("model", "bert"),
        ));
        let router = router_with(backend);
        let err = router
            .route(&RequestContext::new("c"), request("completion", b"hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeNotFound);
        assert_eq!(err.message(), "no node serves bert");
        assert_eq!(err.details()["model"], "bert");
    }

    #[tokio::test]
    async fn metadata_options_reach_the_backend() {
        let backend = Arc::new(FakeBackend::default());
        let router = router_with(Arc::clone(&backend));
        let mut req = request("completion", br#"{"prompt": "once upon"}"#);
        req.metadata = HashMap::from([
            ("temperature".to_string(), "0.5".to_string()),
            ("max_tokens".to_string(), "lots".to_string()),
            ("model".to_string(), "tiny".to_string()),
        ]);

        router.route(&RequestContext::new("c"), req).await.unwrap();

        let calls = backend.calls();
        let BackendRequest::Completion(typed) = &calls[0] else {
            panic!("expected completion request");
        };
        assert_eq!(typed.prompt, "once upon");
        assert_eq!(typed.model.as_deref(), Some("tiny"));
        assert_eq!(typed.options.temperature, Some(0.5));
        assert_eq!(typed.options.max_tokens, None);
    }

    #[tokio::test]
    async fn chat_requires_messages() {
        let router = router_with(Arc::new(FakeBackend::default()));
        let ctx = RequestContext::new("c");

        let err = router.route(&ctx, request("chat", b"hello")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let err = router
            .route(&ctx, request("chat", br#"{"messages": []}"#))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let out = router
            .route(
                &ctx,
                request("chat", br#"{"messages": [{"role": "user", "content": "hi"}]}"#),
            )
            .await
            .unwrap();
        let ServiceOutput::Unary(value) = out else {
            panic!("expected unary output");
        };
        assert_eq!(value, json!({"task": "chat", "correlation_id": "c"}));
    }

    #[tokio::test]
    async fn image_classification_rejects_non_images() {
        let router = router_with(Arc::new(FakeBackend::default()));
        let err = router
            .route(&RequestContext::new("c"), request("image_classification", b"plain text"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.details()["detected_type"], "text/plain");

        // Correct magic bytes, corrupt body.
        let err = router
            .route(
                &RequestContext::new("c"),
                request("image_classification", b"\x89PNG\r\n\x1a\n garbage"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn streaming_service_returns_channel() {
        let backend = Arc::new(FakeBackend::with_chunks(3));
        let router = router_with(backend);
        let out = router
            .route(&RequestContext::new("corr-1"), request("completion_stream", b"go"))
            .await
            .unwrap();
        let ServiceOutput::Stream(mut rx) = out else {
            panic!("expected stream");
        };
        let mut seqs = Vec::new();
        while let Some(chunk) = rx.recv().await {
            seqs.push((chunk.seq, chunk.is_final));
        }
        assert_eq!(seqs, vec![(0, false), (1, false), (2, true)]);
    }
}
