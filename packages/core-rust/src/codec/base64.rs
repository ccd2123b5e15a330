//! Base64 codec with selectable alphabet and optional line wrapping.

use std::io::Read;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::engine::GeneralPurpose;
use base64::Engine;
use bytes::Bytes;

use super::{mime, Codec, CodecError, CodecValue};

/// Base64 alphabet variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alphabet {
    #[default]
    Standard,
    UrlSafe,
}

/// Encodes binary or textual input as base64 text and back.
#[derive(Debug, Clone, Default)]
pub struct Base64Codec {
    alphabet: Alphabet,
    /// Insert a newline every `line_length` encoded characters; 0 disables.
    line_length: usize,
}

impl Base64Codec {
    /// Standard alphabet, no wrapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn url_safe() -> Self {
        Self {
            alphabet: Alphabet::UrlSafe,
            line_length: 0,
        }
    }

    #[must_use]
    pub fn with_line_length(mut self, line_length: usize) -> Self {
        self.line_length = line_length;
        self
    }

    #[must_use]
    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    fn engine(&self) -> &'static GeneralPurpose {
        match self.alphabet {
            Alphabet::Standard => &STANDARD,
            Alphabet::UrlSafe => &URL_SAFE,
        }
    }

    fn engine_no_pad(&self) -> &'static GeneralPurpose {
        match self.alphabet {
            Alphabet::Standard => &STANDARD_NO_PAD,
            Alphabet::UrlSafe => &URL_SAFE_NO_PAD,
        }
    }

    /// Encodes raw bytes, applying the configured line wrapping.
    #[must_use]
    pub fn encode_bytes(&self, data: &[u8]) -> String {
        wrap_lines(self.engine().encode(data), self.line_length)
    }

    /// Drains `reader` and encodes everything it yields.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if reading fails.
    pub fn encode_reader<R: Read>(&self, mut reader: R) -> Result<String, CodecError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(self.encode_bytes(&buf))
    }

    /// Decodes base64 text after removing all whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] if the cleaned text is not valid.
    pub fn decode_str(&self, encoded: &str) -> Result<Vec<u8>, CodecError> {
        Ok(self.engine().decode(strip_whitespace(encoded))?)
    }

    /// Checks that `encoded` is well-formed base64 text.
    ///
    /// Whitespace is ignored. The remaining length must be a multiple of 4
    /// and decode cleanly. Empty input is valid.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidData`] or [`CodecError::Base64`].
    pub fn validate_encoded(&self, encoded: &str) -> Result<(), CodecError> {
        let cleaned = strip_whitespace(encoded);
        if cleaned.is_empty() {
            return Ok(());
        }
        if cleaned.len() % 4 != 0 {
            return Err(CodecError::InvalidData(format!(
                "base64 length {} is not a multiple of 4",
                cleaned.len()
            )));
        }
        self.engine().decode(&cleaned)?;
        Ok(())
    }

    /// Encodes without trailing `=` padding.
    #[must_use]
    pub fn encode_no_padding(&self, data: &[u8]) -> String {
        wrap_lines(self.engine_no_pad().encode(data), self.line_length)
    }

    /// Decodes text whose `=` padding may have been stripped.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] if the padded text is not valid.
    pub fn decode_with_padding(&self, encoded: &str) -> Result<Vec<u8>, CodecError> {
        let mut cleaned = strip_whitespace(encoded);
        let missing = (4 - cleaned.len() % 4) % 4;
        cleaned.extend(std::iter::repeat('=').take(missing));
        Ok(self.engine().decode(cleaned)?)
    }

    fn input_bytes<'a>(&self, value: &'a CodecValue) -> Result<std::borrow::Cow<'a, [u8]>, CodecError> {
        match value {
            CodecValue::Bytes(b) => Ok(std::borrow::Cow::Borrowed(b.as_ref())),
            CodecValue::Text(s) => Ok(std::borrow::Cow::Borrowed(s.as_bytes())),
            CodecValue::Chars(chars) => Ok(std::borrow::Cow::Owned(
                chars.iter().collect::<String>().into_bytes(),
            )),
            other => Err(CodecError::UnsupportedInput {
                codec: self.name(),
                input: other.type_name(),
            }),
        }
    }
}

impl Codec for Base64Codec {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[mime::TEXT_PLAIN, mime::OCTET_STREAM]
    }

    fn encode(&self, value: &CodecValue) -> Result<Vec<u8>, CodecError> {
        let data = self.input_bytes(value)?;
        Ok(self.encode_bytes(&data).into_bytes())
    }

    fn decode(&self, data: &[u8]) -> Result<CodecValue, CodecError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| CodecError::InvalidData(format!("base64 text is not UTF-8: {e}")))?;
        Ok(CodecValue::Bytes(Bytes::from(self.decode_str(text)?)))
    }

    fn validate(&self, value: &CodecValue) -> Result<(), CodecError> {
        self.input_bytes(value).map(|_| ())
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn wrap_lines(encoded: String, line_length: usize) -> String {
    if line_length == 0 || encoded.len() <= line_length {
        return encoded;
    }
    // Base64 output is pure ASCII, so byte chunks are char boundaries.
    let mut out = String::with_capacity(encoded.len() + encoded.len() / line_length);
    for (i, chunk) in encoded.as_bytes().chunks(line_length).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encodes_standard_and_url_safe() {
        let data = [0xFB, 0xFF, 0xBF];
        assert_eq!(Base64Codec::new().encode_bytes(&data), "+/+/");
        assert_eq!(Base64Codec::url_safe().encode_bytes(&data), "-_-_");
    }

    #[test]
    fn encode_accepts_text_chars_and_reader() {
        let codec = Base64Codec::new();
        let from_text = codec.encode(&CodecValue::Text("hi".into())).unwrap();
        let from_chars = codec.encode(&CodecValue::Chars(vec!['h', 'i'])).unwrap();
        let from_reader = codec.encode_reader(&b"hi"[..]).unwrap();
        assert_eq!(from_text, b"aGk=");
        assert_eq!(from_chars, b"aGk=");
        assert_eq!(from_reader, "aGk=");
    }

    #[test]
    fn rejects_json_input() {
        let codec = Base64Codec::new();
        let err = codec
            .validate(&CodecValue::Json(serde_json::json!({"a": 1})))
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedInput { input: "json", .. }));
    }

    #[test]
    fn wraps_lines_every_n_chars() {
        let codec = Base64Codec::new().with_line_length(4);
        let encoded = codec.encode_bytes(b"hello world");
        assert_eq!(encoded, "aGVs\nbG8g\nd29y\nbGQ=");
        assert_eq!(codec.decode_str(&encoded).unwrap(), b"hello world");
    }

    #[test]
    fn decode_strips_whitespace() {
        let codec = Base64Codec::new();
        assert_eq!(codec.decode_str(" aGVs\r\nbG8=\n").unwrap(), b"hello");
    }

    #[test]
    fn validate_encoded_rules() {
        let codec = Base64Codec::new();
        assert!(codec.validate_encoded("").is_ok());
        assert!(codec.validate_encoded("aGVs bG8=").is_ok());
        assert!(matches!(
            codec.validate_encoded("aGVsbG8"),
            Err(CodecError::InvalidData(_))
        ));
        assert!(matches!(
            codec.validate_encoded("a!b@"),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn padding_variants() {
        let codec = Base64Codec::new();
        let unpadded = codec.encode_no_padding(b"hello");
        assert_eq!(unpadded, "aGVsbG8");
        assert_eq!(codec.decode_with_padding(&unpadded).unwrap(), b"hello");
        assert_eq!(codec.decode_with_padding("aGk").unwrap(), b"hi");
        assert_eq!(codec.decode_with_padding("").unwrap(), b"");
    }

    #[test]
    fn empty_roundtrip() {
        let codec = Base64Codec::new();
        let encoded = codec.encode(&CodecValue::Bytes(Bytes::new())).unwrap();
        assert!(encoded.is_empty());
        let CodecValue::Bytes(decoded) = codec.decode(&encoded).unwrap() else {
            panic!("expected bytes");
        };
        assert!(decoded.is_empty());
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(data in proptest::collection::vec(any::<u8>(), 0..512), wrap in 0usize..80) {
            let codec = Base64Codec::new().with_line_length(wrap);
            let encoded = codec.encode_bytes(&data);
            prop_assert_eq!(codec.decode_str(&encoded).unwrap(), data);
        }

        #[test]
        fn url_safe_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let codec = Base64Codec::url_safe();
            let encoded = codec.encode_no_padding(&data);
            prop_assert!(!encoded.contains('='));
            prop_assert_eq!(codec.decode_with_padding(&encoded).unwrap(), data);
        }
    }
}
