//! Backend client contract and the typed requests it accepts.
//!
//! The gateway never runs inference itself. Every handler converts the
//! canonical [`InferRequest`](infergate_core::InferRequest) into one of the
//! typed requests below and hands it to an [`InferenceBackend`].

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use infergate_core::error::Result;
use infergate_core::types::base64_bytes;
use infergate_core::{BackendMetrics, NodeInfo, RequestContext, StreamChunk};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Typed requests
// ---------------------------------------------------------------------------

/// Sampling options shared by text generation services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageClassificationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Encoded image bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub image: Bytes,
    /// Detected image MIME type (e.g., `image/png`).
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

/// Request sent to the backend, tagged by task on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum BackendRequest {
    Embedding(EmbeddingRequest),
    Completion(CompletionRequest),
    Chat(ChatRequest),
    ImageClassification(ImageClassificationRequest),
}

impl BackendRequest {
    /// Wire name of the task.
    #[must_use]
    pub fn task(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "embedding",
            Self::Completion(_) => "completion",
            Self::Chat(_) => "chat",
            Self::ImageClassification(_) => "image_classification",
        }
    }
}

/// Unary backend result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub result: Value,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// InferenceBackend trait
// ---------------------------------------------------------------------------

/// Client for the external inference backend.
///
/// Implementations must honour `ctx.cancel`: a cancelled context aborts the
/// call, and a stream producer stops sending once the context is cancelled
/// or the receiver is dropped.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Lists the backend's compute nodes.
    async fn nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Returns the backend's aggregate counters.
    async fn metrics(&self) -> Result<BackendMetrics>;

    /// Runs a unary inference call.
    async fn infer(&self, ctx: &RequestContext, request: BackendRequest)
        -> Result<BackendResponse>;

    /// Opens a streaming inference call. Chunks arrive in order; the last
    /// one has `is_final` set, or the channel closes early on failure.
    async fn infer_stream(
        &self,
        ctx: &RequestContext,
        request: BackendRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>>;
}
