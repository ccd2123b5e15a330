//! Heuristic MIME classification of raw payloads.

use super::mime;

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF_MAGIC: &[u8] = &[0x47, 0x49, 0x46, 0x38];

/// Classifies a payload by content.
///
/// Checks run in a fixed order: JSON (first non-whitespace byte is `{` or
/// `[`), then image signatures (PNG, JPEG, GIF), then the text heuristic
/// (at least 90% printable ASCII or whitespace). Anything else, including
/// an empty buffer, is `application/octet-stream`.
#[must_use]
pub fn detect_type(data: &[u8]) -> &'static str {
    if data.is_empty() {
        return mime::OCTET_STREAM;
    }

    if let Some(first) = data.iter().find(|b| !b.is_ascii_whitespace()) {
        if *first == b'{' || *first == b'[' {
            return mime::APPLICATION_JSON;
        }
    }

    if data.starts_with(PNG_MAGIC) {
        return mime::IMAGE_PNG;
    }
    if data.starts_with(JPEG_MAGIC) {
        return mime::IMAGE_JPEG;
    }
    if data.starts_with(GIF_MAGIC) {
        return mime::IMAGE_GIF;
    }

    let printable = data
        .iter()
        .filter(|b| matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r'))
        .count();
    if printable * 10 >= data.len() * 9 {
        return mime::TEXT_PLAIN;
    }

    mime::OCTET_STREAM
}

/// Returns `true` for the image MIME types `detect_type` can produce.
#[must_use]
pub fn is_image_type(mime_type: &str) -> bool {
    matches!(mime_type, mime::IMAGE_PNG | mime::IMAGE_JPEG | mime::IMAGE_GIF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_signature_is_png() {
        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
        assert_eq!(detect_type(&data), mime::IMAGE_PNG);
    }

    #[test]
    fn jpeg_and_gif_signatures() {
        assert_eq!(detect_type(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), mime::IMAGE_JPEG);
        assert_eq!(detect_type(b"GIF89a\x01\x00"), mime::IMAGE_GIF);
    }

    #[test]
    fn leading_brace_is_json() {
        assert_eq!(detect_type(b"{\"a\":1}"), mime::APPLICATION_JSON);
        assert_eq!(detect_type(b"  \n\t[1,2]"), mime::APPLICATION_JSON);
    }

    #[test]
    fn mostly_printable_is_text() {
        let mut data = vec![b'a'; 95];
        data.extend_from_slice(&[0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(data.len(), 100);
        assert_eq!(detect_type(&data), mime::TEXT_PLAIN);
    }

    #[test]
    fn below_threshold_is_binary() {
        let mut data = vec![b'a'; 89];
        data.extend_from_slice(&[0x00; 11]);
        assert_eq!(detect_type(&data), mime::OCTET_STREAM);
    }

    #[test]
    fn non_printable_bytes_are_octet_stream() {
        let data: Vec<u8> = (0..100u8).map(|i| 0x80 | (i % 0x7F)).collect();
        assert_eq!(detect_type(&data), mime::OCTET_STREAM);
    }

    #[test]
    fn empty_is_octet_stream() {
        assert_eq!(detect_type(&[]), mime::OCTET_STREAM);
    }

    #[test]
    fn image_type_predicate() {
        assert!(is_image_type(mime::IMAGE_GIF));
        assert!(!is_image_type(mime::TEXT_PLAIN));
    }
}
