//! Per-service handlers: payload normalization through the codec registry,
//! typed request construction, and the backend call.

use std::sync::Arc;

use async_trait::async_trait;
use infergate_core::codec::detect::is_image_type;
use infergate_core::codec::{detect_type, mime, CodecValue};
use infergate_core::error::Result;
use infergate_core::{CodecRegistry, GatewayError, InferRequest, RequestContext, StreamChunk};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::backend::{
    BackendRequest, ChatMessage, ChatRequest, CompletionRequest, EmbeddingRequest,
    ImageClassificationRequest, InferenceBackend,
};
use super::options;

// ---------------------------------------------------------------------------
// ServiceHandler trait
// ---------------------------------------------------------------------------

/// Result of a routed request.
#[derive(Debug)]
pub enum ServiceOutput {
    /// A single JSON result, returned in the response envelope's `data`.
    Unary(Value),
    /// Live chunk sequence, rendered by the stream framer.
    Stream(mpsc::Receiver<StreamChunk>),
}

/// Handler bound to one service name in the router's dispatch table.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// `true` if [`ServiceHandler::handle`] returns [`ServiceOutput::Stream`].
    fn is_streaming(&self) -> bool {
        false
    }

    async fn handle(&self, ctx: &RequestContext, request: InferRequest) -> Result<ServiceOutput>;
}

/// Backend and codec registry shared by every built-in handler.
#[derive(Clone)]
pub struct HandlerDeps {
    pub backend: Arc<dyn InferenceBackend>,
    pub codecs: Arc<CodecRegistry>,
}

impl HandlerDeps {
    #[must_use]
    pub fn new(backend: Arc<dyn InferenceBackend>, codecs: Arc<CodecRegistry>) -> Self {
        Self { backend, codecs }
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
        stream: bool,
    ) -> Result<ServiceOutput> {
        if stream {
            let rx = self.backend.infer_stream(ctx, request).await?;
            Ok(ServiceOutput::Stream(rx))
        } else {
            let response = self.backend.infer(ctx, request).await?;
            Ok(ServiceOutput::Unary(response.result))
        }
    }

    /// Decodes a JSON payload through the registry.
    fn decode_json(&self, payload: &[u8]) -> Result<Value> {
        match self.codecs.decode(mime::APPLICATION_JSON, payload) {
            Ok(CodecValue::Json(value)) => Ok(value),
            Ok(other) => Err(GatewayError::internal(format!(
                "JSON codec produced {} value",
                other.type_name()
            ))),
            Err(err) => Err(GatewayError::invalid("payload is not valid JSON").with_source(err)),
        }
    }

    /// Decodes the payload as JSON only if it looks like JSON and parses.
    /// Text such as `[INST] ...` or `{name} ...` sniffs as JSON but is
    /// still a plain-text payload, so a parse failure is not an error here.
    fn try_json(&self, payload: &[u8]) -> Option<Value> {
        if detect_type(payload) != mime::APPLICATION_JSON {
            return None;
        }
        match self.decode_json(payload) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "JSON-like payload treated as text");
                None
            }
        }
    }
}

fn model_for(request: &InferRequest) -> Option<String> {
    options::model(&request.metadata).or_else(|| {
        request
            .task
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

fn utf8_payload(payload: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| GatewayError::invalid("payload is not valid UTF-8").with_source(e))?;
    Ok(text.to_string())
}

fn require_payload(request: &InferRequest) -> Result<()> {
    if request.payload.is_empty() {
        return Err(GatewayError::invalid("payload must not be empty")
            .with_detail("service", request.service.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

/// `embedding`: a JSON array of strings, or raw UTF-8 text.
pub struct EmbeddingHandler {
    deps: HandlerDeps,
}

impl EmbeddingHandler {
    #[must_use]
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    /// A JSON array of strings gives the inputs; any other payload is
    /// embedded as one UTF-8 text.
    fn inputs(&self, payload: &[u8]) -> Result<Vec<String>> {
        match self.deps.try_json(payload).and_then(string_list) {
            Some(inputs) => Ok(inputs),
            None => Ok(vec![utf8_payload(payload)?]),
        }
    }
}

fn string_list(value: Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

#[async_trait]
impl ServiceHandler for EmbeddingHandler {
    async fn handle(&self, ctx: &RequestContext, request: InferRequest) -> Result<ServiceOutput> {
        require_payload(&request)?;
        let inputs = self.inputs(&request.payload)?;
        if inputs.is_empty() {
            return Err(GatewayError::invalid("embedding inputs must not be empty"));
        }
        let typed = EmbeddingRequest {
            model: model_for(&request),
            inputs,
            dimensions: options::parse_option(&request.metadata, options::DIMENSIONS),
            normalize: options::parse_bool(&request.metadata, options::NORMALIZE),
        };
        self.deps
            .dispatch(ctx, BackendRequest::Embedding(typed), false)
            .await
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// `completion` / `completion_stream`: UTF-8 prompt text, or a JSON object
/// with a `prompt` string.
pub struct CompletionHandler {
    deps: HandlerDeps,
    stream: bool,
}

impl CompletionHandler {
    #[must_use]
    pub fn new(deps: HandlerDeps, stream: bool) -> Self {
        Self { deps, stream }
    }

    fn prompt(&self, payload: &[u8]) -> Result<String> {
        let from_json = self.deps.try_json(payload).and_then(|mut value| {
            match value.get_mut("prompt").map(Value::take) {
                Some(Value::String(prompt)) => Some(prompt),
                _ => None,
            }
        });
        match from_json {
            Some(prompt) => Ok(prompt),
            None => utf8_payload(payload),
        }
    }
}

#[async_trait]
impl ServiceHandler for CompletionHandler {
    fn is_streaming(&self) -> bool {
        self.stream
    }

    async fn handle(&self, ctx: &RequestContext, request: InferRequest) -> Result<ServiceOutput> {
        require_payload(&request)?;
        let prompt = self.prompt(&request.payload)?;
        if prompt.trim().is_empty() {
            return Err(GatewayError::invalid("prompt must not be empty"));
        }
        let typed = CompletionRequest {
            model: model_for(&request),
            prompt,
            options: options::generation_options(&request.metadata),
        };
        self.deps
            .dispatch(ctx, BackendRequest::Completion(typed), self.stream)
            .await
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// `chat` / `chat_stream`: JSON object with a non-empty `messages` array of
/// `{role, content}` turns.
pub struct ChatHandler {
    deps: HandlerDeps,
    stream: bool,
}

impl ChatHandler {
    #[must_use]
    pub fn new(deps: HandlerDeps, stream: bool) -> Self {
        Self { deps, stream }
    }

    fn messages(&self, payload: &[u8]) -> Result<Vec<ChatMessage>> {
        let Some(mut value) = self.deps.try_json(payload) else {
            return Err(GatewayError::invalid("chat payload must be a JSON object"));
        };
        let Some(messages) = value.get_mut("messages").map(Value::take) else {
            return Err(GatewayError::invalid("chat payload requires `messages`"));
        };
        let messages: Vec<ChatMessage> = serde_json::from_value(messages).map_err(|e| {
            GatewayError::invalid("`messages` must be a list of {role, content}").with_source(e)
        })?;
        if messages.is_empty() {
            return Err(GatewayError::invalid("`messages` must not be empty"));
        }
        Ok(messages)
    }
}

#[async_trait]
impl ServiceHandler for ChatHandler {
    fn is_streaming(&self) -> bool {
        self.stream
    }

    async fn handle(&self, ctx: &RequestContext, request: InferRequest) -> Result<ServiceOutput> {
        require_payload(&request)?;
        let typed = ChatRequest {
            model: model_for(&request),
            messages: self.messages(&request.payload)?,
            options: options::generation_options(&request.metadata),
        };
        self.deps
            .dispatch(ctx, BackendRequest::Chat(typed), self.stream)
            .await
    }
}

// ---------------------------------------------------------------------------
// Image classification
// ---------------------------------------------------------------------------

/// `image_classification`: JPEG, PNG, or GIF bytes. The image is decoded
/// once through the registry to reject corrupt payloads before the backend
/// call.
pub struct ImageClassificationHandler {
    deps: HandlerDeps,
}

impl ImageClassificationHandler {
    #[must_use]
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ServiceHandler for ImageClassificationHandler {
    async fn handle(&self, ctx: &RequestContext, request: InferRequest) -> Result<ServiceOutput> {
        require_payload(&request)?;
        let mime_type = detect_type(&request.payload);
        if !is_image_type(mime_type) {
            return Err(GatewayError::invalid("payload is not a JPEG, PNG, or GIF image")
                .with_detail("detected_type", mime_type));
        }
        if let Err(err) = self.deps.codecs.decode(mime_type, &request.payload) {
            return Err(GatewayError::invalid("image payload could not be decoded")
                .with_detail("mime_type", mime_type)
                .with_source(err));
        }

        let typed = ImageClassificationRequest {
            model: model_for(&request),
            image: request.payload.clone(),
            mime_type: mime_type.to_string(),
            top_k: options::parse_option(&request.metadata, options::TOP_K),
        };
        self.deps
            .dispatch(ctx, BackendRequest::ImageClassification(typed), false)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use infergate_core::ErrorKind;

    use super::*;
    use crate::service::testing::FakeBackend;

    fn deps(backend: &Arc<FakeBackend>) -> HandlerDeps {
        HandlerDeps::new(
            Arc::clone(backend) as Arc<dyn InferenceBackend>,
            Arc::new(CodecRegistry::with_defaults()),
        )
    }

    fn request(service: &str, payload: &[u8]) -> InferRequest {
        InferRequest {
            service: service.to_string(),
            payload: Bytes::copy_from_slice(payload),
            correlation_id: "c-1".to_string(),
            ..InferRequest::default()
        }
    }

    async fn embedded_inputs(payload: &[u8]) -> Vec<String> {
        let backend = Arc::new(FakeBackend::default());
        EmbeddingHandler::new(deps(&backend))
            .handle(&RequestContext::new("c-1"), request("embedding", payload))
            .await
            .unwrap();
        let calls = backend.calls();
        let BackendRequest::Embedding(typed) = &calls[0] else {
            panic!("expected embedding request");
        };
        typed.inputs.clone()
    }

    async fn completion_prompt(payload: &[u8]) -> String {
        let backend = Arc::new(FakeBackend::default());
        CompletionHandler::new(deps(&backend), false)
            .handle(&RequestContext::new("c-1"), request("completion", payload))
            .await
            .unwrap();
        let calls = backend.calls();
        let BackendRequest::Completion(typed) = &calls[0] else {
            panic!("expected completion request");
        };
        typed.prompt.clone()
    }

    #[tokio::test]
    async fn bracketed_prompt_is_plain_text() {
        let prompt = "[INST] Tell me a joke [/INST]";
        assert_eq!(completion_prompt(prompt.as_bytes()).await, prompt);

        let templated = "{name} wrote this";
        assert_eq!(completion_prompt(templated.as_bytes()).await, templated);
    }

    #[tokio::test]
    async fn completion_prompt_field_is_extracted() {
        assert_eq!(completion_prompt(br#"{"prompt": "once upon"}"#).await, "once upon");
        // An object without a string prompt is just text.
        assert_eq!(completion_prompt(br#"{"text": "x"}"#).await, r#"{"text": "x"}"#);
    }

    #[tokio::test]
    async fn embedding_text_that_looks_like_json() {
        assert_eq!(
            embedded_inputs(b"{name} is a placeholder").await,
            vec!["{name} is a placeholder"]
        );
        assert_eq!(embedded_inputs(b"[1] Introduction").await, vec!["[1] Introduction"]);
    }

    #[tokio::test]
    async fn embedding_json_of_other_shape_is_one_text() {
        assert_eq!(embedded_inputs(br#"{"foo":1}"#).await, vec![r#"{"foo":1}"#]);
        assert_eq!(embedded_inputs(b"[1, 2]").await, vec!["[1, 2]"]);
    }

    #[tokio::test]
    async fn embedding_string_array_is_split() {
        assert_eq!(embedded_inputs(br#"["a", "b"]"#).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_embedding_array_is_invalid() {
        let backend = Arc::new(FakeBackend::default());
        let err = EmbeddingHandler::new(deps(&backend))
            .handle(&RequestContext::new("c-1"), request("embedding", b"[]"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn non_utf8_text_is_invalid() {
        let backend = Arc::new(FakeBackend::default());
        let err = CompletionHandler::new(deps(&backend), false)
            .handle(&RequestContext::new("c-1"), request("completion", &[0xff, 0xfe, 0x00]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.message(), "payload is not valid UTF-8");
    }

    #[tokio::test]
    async fn chat_still_requires_json_messages() {
        let backend = Arc::new(FakeBackend::default());
        let handler = ChatHandler::new(deps(&backend), false);
        let ctx = RequestContext::new("c-1");

        let err = handler
            .handle(&ctx, request("chat", b"[INST] hi [/INST]"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let err = handler
            .handle(&ctx, request("chat", br#"{"foo": 1}"#))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "chat payload requires `messages`");

        handler
            .handle(
                &ctx,
                request("chat", br#"{"messages": [{"role": "user", "content": "hi"}]}"#),
            )
            .await
            .unwrap();
        assert_eq!(backend.calls().len(), 1);
    }
}
