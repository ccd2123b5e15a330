//! Pluggable payload codecs keyed by MIME type.
//!
//! - [`registry`]: MIME -> codec table with validate/encode/decode entry points
//! - [`detect`]: heuristic MIME classification of raw payloads
//! - [`json`], [`base64`], [`image`]: the built-in codecs

pub mod base64;
pub mod detect;
pub mod image;
pub mod json;
pub mod registry;

pub use self::base64::{Alphabet, Base64Codec};
pub use self::detect::detect_type;
pub use self::image::{DecodedImage, ImageCodec, ImageInfo};
pub use self::json::JsonCodec;
pub use self::registry::CodecRegistry;

use bytes::Bytes;
use serde_json::Value;

/// Canonical MIME types understood by the default registry.
pub mod mime {
    pub const APPLICATION_JSON: &str = "application/json";
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const IMAGE_JPEG: &str = "image/jpeg";
    pub const IMAGE_PNG: &str = "image/png";
    pub const IMAGE_GIF: &str = "image/gif";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// In-memory value handed to or produced by a codec.
#[derive(Debug, Clone)]
pub enum CodecValue {
    Bytes(Bytes),
    Text(String),
    Chars(Vec<char>),
    Json(Value),
    Image(DecodedImage),
}

impl CodecValue {
    /// Short variant name, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Chars(_) => "chars",
            Self::Json(_) => "json",
            Self::Image(_) => "image",
        }
    }
}

/// Failure inside a single codec, before registry context is attached.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec {codec} cannot handle {input} input")]
    UnsupportedInput {
        codec: &'static str,
        input: &'static str,
    },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Base64(#[from] ::base64::DecodeError),
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Strategy providing encode/decode/validate for one or more MIME types.
///
/// `validate` checks that a value is acceptable input for `encode`; the
/// registry always calls it first so the two failure modes can be told
/// apart.
pub trait Codec: Send + Sync {
    /// Stable codec name, used to group registrations.
    fn name(&self) -> &'static str;

    /// MIME types this codec is able to serve.
    fn mime_types(&self) -> &[&'static str];

    /// Serializes `value` into bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the value cannot be represented.
    fn encode(&self, value: &CodecValue) -> Result<Vec<u8>, CodecError>;

    /// Parses bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the data is malformed.
    fn decode(&self, data: &[u8]) -> Result<CodecValue, CodecError>;

    /// Checks that `value` is acceptable input for [`Codec::encode`].
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] describing why the value was rejected.
    fn validate(&self, value: &CodecValue) -> Result<(), CodecError>;

    /// Returns `true` if `mime_type` is one of [`Codec::mime_types`].
    fn supports(&self, mime_type: &str) -> bool {
        self.mime_types().iter().any(|m| m.eq_ignore_ascii_case(mime_type))
    }
}
