//! Server-Sent Events framing for streamed inference results.
//!
//! Outbound, [`sse_response`] renders a chunk channel as a
//! `text/event-stream` body with one `data: {json}\n\n` frame per chunk.
//! Inbound, [`SseDecoder`] splits a backend's event stream back into data
//! payloads. Both sides share the [`WireChunk`] JSON shape.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::{HeaderName, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use infergate_core::error::Result;
use infergate_core::{ErrorKind, GatewayError, StreamChunk};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

pub const TEXT_EVENT_STREAM: &str = "text/event-stream";
static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// JSON body of one SSE frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChunk {
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub result_b64: String,
}

impl From<&StreamChunk> for WireChunk {
    fn from(chunk: &StreamChunk) -> Self {
        Self {
            correlation_id: chunk.correlation_id.clone(),
            is_final: chunk.is_final,
            seq: chunk.seq,
            total: chunk.total,
            meta: chunk.meta.clone(),
            result_b64: STANDARD.encode(&chunk.result),
        }
    }
}

impl WireChunk {
    /// Converts back into a [`StreamChunk`].
    ///
    /// # Errors
    ///
    /// Returns `ResponseFailed` if `result_b64` is not valid base64.
    pub fn into_chunk(self) -> Result<StreamChunk> {
        let result = STANDARD.decode(self.result_b64.trim()).map_err(|e| {
            GatewayError::new(ErrorKind::ResponseFailed, "stream chunk result is not base64")
                .with_detail("seq", self.seq)
                .with_source(e)
        })?;
        Ok(StreamChunk {
            correlation_id: self.correlation_id,
            is_final: self.is_final,
            seq: self.seq,
            total: self.total,
            meta: self.meta,
            result: Bytes::from(result),
        })
    }
}

/// Renders one chunk as a complete SSE frame.
#[must_use]
pub fn encode_frame(chunk: &StreamChunk) -> Bytes {
    // WireChunk holds only strings, integers, and bools, so serialization
    // cannot fail.
    let json = serde_json::to_string(&WireChunk::from(chunk)).unwrap_or_default();
    Bytes::from(format!("data: {json}\n\n"))
}

// ---------------------------------------------------------------------------
// Framer
// ---------------------------------------------------------------------------

struct FrameState {
    rx: mpsc::Receiver<StreamChunk>,
    service: String,
    finished: bool,
    // Cancels the request's token when the body is dropped, which stops the
    // producer once the client goes away.
    _cancel_on_drop: DropGuard,
    // Released together with the body, e.g. an in-flight guard.
    _held: Option<Box<dyn Send>>,
}

/// Builds the streaming HTTP response for a chunk channel.
///
/// Frames are emitted in channel order. The body ends after the chunk with
/// `is_final` set, or when the producer closes the channel without one.
pub fn sse_response(
    rx: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    service: impl Into<String>,
) -> Response {
    framed(rx, cancel, service.into(), None)
}

/// Like [`sse_response`], but keeps `held` alive until the body is dropped.
pub fn sse_response_holding<H: Send + 'static>(
    rx: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    service: impl Into<String>,
    held: H,
) -> Response {
    framed(rx, cancel, service.into(), Some(Box::new(held)))
}

fn framed(
    rx: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    service: String,
    held: Option<Box<dyn Send>>,
) -> Response {
    let state = FrameState {
        rx,
        service,
        finished: false,
        _cancel_on_drop: cancel.drop_guard(),
        _held: held,
    };

    let frames = futures_util::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        let Some(chunk) = state.rx.recv().await else {
            debug!(service = %state.service, "stream closed without final chunk");
            return None;
        };
        state.finished = chunk.is_final;
        metrics::counter!("infergate_stream_chunks_total", "service" => state.service.clone())
            .increment(1);
        Some((Ok::<_, Infallible>(encode_frame(&chunk)), state))
    });

    (
        [
            (CONTENT_TYPE, TEXT_EVENT_STREAM),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Default cap on bytes buffered for one unfinished event.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 4 * 1024 * 1024;

/// Incremental SSE parser yielding the `data` payload of each event.
///
/// Multi-line `data:` fields are joined with `\n`. Comment lines and other
/// fields (`event:`, `id:`, `retry:`) are ignored. Line endings may be
/// `\n`, `\r\n`, or a lone `\r`.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a blank line.
    scanned: usize,
    /// The previous byte was `\r`, so a following `\n` is part of it.
    after_cr: bool,
    max_event_size: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_event_size(DEFAULT_MAX_EVENT_SIZE)
    }
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_event_size(max_event_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            after_cr: false,
            max_event_size,
        }
    }

    /// Feeds raw bytes, returning the data payloads of every event completed
    /// by them.
    ///
    /// # Errors
    ///
    /// Returns `ResponseFailed` once an unfinished event grows past the
    /// configured maximum. The buffered bytes are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.append_normalized(bytes);

        let mut events = Vec::new();
        let mut start = 0;
        // A blank line may straddle the previous push.
        let mut from = self.scanned.saturating_sub(1);
        while let Some(pos) = find_blank_line(&self.buf[from..]) {
            let end = from + pos;
            if let Some(data) = event_data(&self.buf[start..end]) {
                events.push(data);
            }
            start = end + 2;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_event_size {
            let buffered = self.buf.len();
            self.buf.clear();
            self.scanned = 0;
            return Err(GatewayError::new(
                ErrorKind::ResponseFailed,
                "backend stream event exceeds the size limit",
            )
            .with_detail("max_event_size", self.max_event_size)
            .with_detail("buffered", buffered));
        }
        Ok(events)
    }

    fn append_normalized(&mut self, bytes: &[u8]) {
        self.buf.reserve(bytes.len());
        for &byte in bytes {
            let after_cr = std::mem::replace(&mut self.after_cr, byte == b'\r');
            match byte {
                b'\r' => self.buf.push(b'\n'),
                b'\n' if after_cr => {}
                other => self.buf.push(other),
            }
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn event_data(event: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
