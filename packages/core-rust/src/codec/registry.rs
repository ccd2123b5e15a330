//! MIME type -> codec registry.
//!
//! The registry is an explicit value: callers construct one (usually via
//! [`CodecRegistry::with_defaults`]) and share it behind an `Arc`. Reads
//! take a shared lock, so concurrent encode/decode calls never block each
//! other; registration and removal take the exclusive lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{mime, Base64Codec, Codec, CodecError, CodecValue, ImageCodec, JsonCodec};
use crate::error::{ErrorKind, GatewayError, Result};

/// Thread-safe table mapping each MIME type to exactly one codec.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: RwLock<HashMap<String, Arc<dyn Codec>>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("mime_types", &self.list())
            .finish()
    }
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the built-in codecs:
    ///
    /// | MIME | Codec |
    /// |---|---|
    /// | `application/json` | JSON |
    /// | `text/plain`, `application/octet-stream` | Base64 |
    /// | `image/jpeg`, `image/png`, `image/gif` | Image |
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let defaults: [(&[&str], Arc<dyn Codec>); 3] = [
            (&[mime::APPLICATION_JSON], Arc::new(JsonCodec::new())),
            (&[mime::TEXT_PLAIN, mime::OCTET_STREAM], Arc::new(Base64Codec::new())),
            (
                &[mime::IMAGE_JPEG, mime::IMAGE_PNG, mime::IMAGE_GIF],
                Arc::new(ImageCodec::default()),
            ),
        ];
        for (mime_types, codec) in defaults {
            // Built-in codecs declare every type above, so this cannot fail
            // on a fresh registry.
            if let Err(err) = registry.register(mime_types, codec) {
                tracing::error!(error = %err, "failed to register default codec");
            }
        }
        registry
    }

    /// Binds `codec` to each of `mime_types`.
    ///
    /// The call is all-or-nothing: every MIME type is checked before any is
    /// inserted.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the list is empty, a MIME type is empty or not
    /// declared by the codec, and `Invalid` if a type is already bound.
    pub fn register(&self, mime_types: &[&str], codec: Arc<dyn Codec>) -> Result<()> {
        if mime_types.is_empty() {
            return Err(GatewayError::invalid("no MIME types given for codec")
                .with_detail("codec", codec.name()));
        }

        let mut codecs = self.codecs.write();
        for mime_type in mime_types {
            let key = normalize(mime_type);
            if key.is_empty() {
                return Err(GatewayError::invalid("MIME type must not be empty")
                    .with_detail("codec", codec.name()));
            }
            if !codec.supports(&key) {
                return Err(GatewayError::invalid(format!(
                    "codec {} does not support {key}",
                    codec.name()
                ))
                .with_detail("mime_type", key)
                .with_detail("codec", codec.name()));
            }
            if codecs.contains_key(&key) {
                return Err(GatewayError::invalid(format!(
                    "a codec is already registered for {key}"
                ))
                .with_detail("mime_type", key)
                .with_detail("codec", codec.name()));
            }
        }

        for mime_type in mime_types {
            codecs.insert(normalize(mime_type), Arc::clone(&codec));
        }
        debug!(codec = codec.name(), ?mime_types, "codec registered");
        Ok(())
    }

    /// Returns the codec bound to `mime_type`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is registered for it.
    pub fn get(&self, mime_type: &str) -> Result<Arc<dyn Codec>> {
        let key = normalize(mime_type);
        self.codecs.read().get(&key).cloned().ok_or_else(|| {
            GatewayError::not_found(format!("no codec registered for {key}"))
                .with_detail("mime_type", key)
        })
    }

    #[must_use]
    pub fn exists(&self, mime_type: &str) -> bool {
        self.codecs.read().contains_key(&normalize(mime_type))
    }

    /// Removes the binding for `mime_type`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing was registered for it.
    pub fn unregister(&self, mime_type: &str) -> Result<()> {
        let key = normalize(mime_type);
        match self.codecs.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(GatewayError::not_found(format!("no codec registered for {key}"))
                .with_detail("mime_type", key)),
        }
    }

    /// Removes every binding.
    pub fn clear(&self) {
        self.codecs.write().clear();
    }

    /// All registered MIME types, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.codecs.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Registered MIME types grouped by codec name.
    #[must_use]
    pub fn list_codecs(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (mime_type, codec) in self.codecs.read().iter() {
            grouped
                .entry(codec.name().to_string())
                .or_default()
                .push(mime_type.clone());
        }
        for types in grouped.values_mut() {
            types.sort();
        }
        grouped
    }

    #[must_use]
    pub fn is_supported_type(&self, mime_type: &str) -> bool {
        self.exists(mime_type)
    }

    #[must_use]
    pub fn supported_types(&self) -> Vec<String> {
        self.list()
    }

    /// Validates and encodes `value` with the codec bound to `mime_type`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown MIME type, `Invalid` when validation
    /// rejects the value, `Internal` when encoding fails. Codec failures
    /// carry `mime_type` and `codec` details.
    pub fn encode(&self, mime_type: &str, value: &CodecValue) -> Result<Vec<u8>> {
        let codec = self.get(mime_type)?;
        codec
            .validate(value)
            .map_err(|e| wrap(ErrorKind::Invalid, "validation failed", mime_type, codec.as_ref(), e))?;
        codec
            .encode(value)
            .map_err(|e| wrap(ErrorKind::Internal, "encode failed", mime_type, codec.as_ref(), e))
    }

    /// Decodes `data` with the codec bound to `mime_type`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown MIME type, `Internal` for any decode
    /// failure.
    pub fn decode(&self, mime_type: &str, data: &[u8]) -> Result<CodecValue> {
        let codec = self.get(mime_type)?;
        codec
            .decode(data)
            .map_err(|e| wrap(ErrorKind::Internal, "decode failed", mime_type, codec.as_ref(), e))
    }
}

fn normalize(mime_type: &str) -> String {
    mime_type.trim().to_ascii_lowercase()
}

fn wrap(
    kind: ErrorKind,
    what: &str,
    mime_type: &str,
    codec: &dyn Codec,
    err: CodecError,
) -> GatewayError {
    GatewayError::new(
        kind,
        format!("{what} for {} with codec {}: {err}", normalize(mime_type), codec.name()),
    )
    .with_detail("mime_type", normalize(mime_type))
    .with_detail("codec", codec.name())
    .with_source(err)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_cover_canonical_types() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(
            registry.list(),
            vec![
                "application/json",
                "application/octet-stream",
                "image/gif",
                "image/jpeg",
                "image/png",
                "text/plain",
            ]
        );
        let grouped = registry.list_codecs();
        assert_eq!(grouped["base64"], vec!["application/octet-stream", "text/plain"]);
        assert_eq!(grouped["image"].len(), 3);
        assert!(registry.is_supported_type("IMAGE/PNG"));
    }

    #[test]
    fn register_rejects_duplicate() {
        let registry = CodecRegistry::with_defaults();
        let err = registry
            .register(&[mime::APPLICATION_JSON], Arc::new(JsonCodec::pretty()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.details()["mime_type"], "application/json");
    }

    #[test]
    fn register_rejects_undeclared_type() {
        let registry = CodecRegistry::new();
        let err = registry
            .register(&["image/png"], Arc::new(JsonCodec::new()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(!registry.exists("image/png"));
    }

    #[test]
    fn register_rejects_empty_type_atomically() {
        let registry = CodecRegistry::new();
        let err = registry
            .register(&["text/plain", " "], Arc::new(Base64Codec::new()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(registry.list().is_empty());
        assert!(registry.register(&[], Arc::new(Base64Codec::new())).is_err());
    }

    #[test]
    fn unregister_and_clear() {
        let registry = CodecRegistry::with_defaults();
        registry.unregister("text/plain").unwrap();
        assert!(!registry.exists("text/plain"));
        assert_eq!(
            registry.unregister("text/plain").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        // The freed slot can be re-bound.
        registry
            .register(&["text/plain"], Arc::new(Base64Codec::url_safe()))
            .unwrap();

        registry.clear();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn encode_and_decode_through_registry() {
        let registry = CodecRegistry::with_defaults();
        let encoded = registry
            .encode("application/json", &CodecValue::Json(json!({"a": [1, 2]})))
            .unwrap();
        let CodecValue::Json(value) = registry.decode("application/json", &encoded).unwrap() else {
            panic!("expected json");
        };
        assert_eq!(value, json!({"a": [1, 2]}));

        let encoded = registry
            .encode("text/plain", &CodecValue::Bytes(Bytes::from_static(b"hi")))
            .unwrap();
        assert_eq!(encoded, b"aGk=");
    }

    #[test]
    fn validation_failure_is_invalid_with_context() {
        let registry = CodecRegistry::with_defaults();
        let err = registry
            .encode("image/png", &CodecValue::Text("not an image".into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(err.details()["codec"], "image");
        assert_eq!(err.details()["mime_type"], "image/png");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn decode_failure_is_internal() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decode("application/json", b"{oops").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.details()["codec"], "json");
    }

    #[test]
    fn unknown_type_is_not_found() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decode("video/mp4", b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn concurrent_readers_share_the_registry() {
        let registry = Arc::new(CodecRegistry::with_defaults());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let value = CodecValue::Json(json!({ "n": i }));
                    let bytes = registry.encode("application/json", &value).unwrap();
                    registry.decode("application/json", &bytes).is_ok()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
