//! Image codec: JPEG/PNG/GIF decoding, JPEG/PNG encoding, and simple
//! transforms (info, resize, crop, data-URL wrapping).

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use super::base64::Base64Codec;
use super::{mime, Codec, CodecError, CodecValue};

const DEFAULT_QUALITY: u8 = 85;

/// A decoded image together with the format it was read from.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    /// Lowercase format name: `jpeg`, `png`, or `gif`.
    pub format: String,
}

/// Summary returned by [`ImageCodec::image_info`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ImageInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub color_model: String,
    /// Size of the encoded input in bytes.
    pub size: usize,
    /// `width / height`, absent for zero-height images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f64>,
}

/// Encodes decoded images to JPEG or PNG and decodes JPEG/PNG/GIF.
#[derive(Debug, Clone)]
pub struct ImageCodec {
    /// Output format for `encode`. Anything other than `jpeg`/`jpg`/`png`
    /// falls back to PNG.
    output_format: String,
    /// JPEG quality, clamped to 1..=100.
    quality: u8,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self {
            output_format: "png".to_string(),
            quality: DEFAULT_QUALITY,
        }
    }
}

impl ImageCodec {
    #[must_use]
    pub fn new(output_format: impl Into<String>, quality: u8) -> Self {
        Self {
            output_format: output_format.into().to_ascii_lowercase(),
            quality: quality.clamp(1, 100),
        }
    }

    #[must_use]
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encodes `image` in the named format (`jpeg`/`jpg` or `png`; anything
    /// else becomes PNG).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Image`] if the encoder fails.
    pub fn encode_as(&self, image: &DynamicImage, format: &str) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        if is_jpeg_name(format) {
            // JPEG has no alpha channel.
            let rgb = image.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
            encoder.encode_image(&rgb)?;
        } else {
            image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
        Ok(buf)
    }

    /// Decodes JPEG, PNG, or GIF bytes, sniffing the format from content.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidData`] for other formats and
    /// [`CodecError::Image`] for corrupt data.
    pub fn decode_image(&self, data: &[u8]) -> Result<DecodedImage, CodecError> {
        let format = image::guess_format(data)?;
        let name = format_name(format).ok_or_else(|| {
            CodecError::InvalidData(format!("unsupported image format: {format:?}"))
        })?;
        let image = image::load_from_memory_with_format(data, format)?;
        Ok(DecodedImage {
            image,
            format: name.to_string(),
        })
    }

    /// Describes an encoded image without keeping the pixels around.
    ///
    /// # Errors
    ///
    /// Same as [`ImageCodec::decode_image`].
    pub fn image_info(&self, data: &[u8]) -> Result<ImageInfo, CodecError> {
        let decoded = self.decode_image(data)?;
        let (width, height) = (decoded.image.width(), decoded.image.height());
        let aspect_ratio = (height > 0).then(|| f64::from(width) / f64::from(height));
        Ok(ImageInfo {
            format: decoded.format,
            width,
            height,
            color_model: format!("{:?}", decoded.image.color()),
            size: data.len(),
            aspect_ratio,
        })
    }

    /// Nearest-neighbour scaling to exactly `width` x `height`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidData`] if either dimension is zero.
    pub fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidData(format!(
                "invalid target size {width}x{height}"
            )));
        }
        Ok(image.resize_exact(width, height, FilterType::Nearest))
    }

    /// Copies the `width` x `height` rectangle whose top-left corner is at
    /// (`x`, `y`).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidData`] if the rectangle is empty or
    /// extends past the source bounds.
    pub fn crop(
        &self,
        image: &DynamicImage,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        let right = x.checked_add(width);
        let bottom = y.checked_add(height);
        let in_bounds = matches!((right, bottom), (Some(r), Some(b)) if r <= image.width() && b <= image.height());
        if width == 0 || height == 0 || !in_bounds {
            return Err(CodecError::InvalidData(format!(
                "crop rectangle {width}x{height}+{x}+{y} outside {}x{} image",
                image.width(),
                image.height()
            )));
        }
        Ok(image.crop_imm(x, y, width, height))
    }

    /// Wraps an image as a `data:image/<fmt>;base64,<data>` URL.
    ///
    /// With no explicit format the image's own format is used (GIF sources
    /// are re-encoded as PNG since only JPEG and PNG are written).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Image`] if encoding fails.
    pub fn to_base64(
        &self,
        image: &DecodedImage,
        format: Option<&str>,
    ) -> Result<String, CodecError> {
        let requested = format.unwrap_or(&image.format);
        let written = if is_jpeg_name(requested) { "jpeg" } else { "png" };
        let bytes = self.encode_as(&image.image, written)?;
        Ok(format!(
            "data:image/{written};base64,{}",
            Base64Codec::new().encode_bytes(&bytes)
        ))
    }

    /// Unwraps a data URL (or bare base64 text) and decodes the image,
    /// detecting the format from the decoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] or any error from
    /// [`ImageCodec::decode_image`].
    pub fn from_base64(&self, encoded: &str) -> Result<DecodedImage, CodecError> {
        let payload = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',').ok_or_else(|| {
                    CodecError::InvalidData("data URL has no ',' separator".to_string())
                })?;
                if !header.ends_with(";base64") {
                    return Err(CodecError::InvalidData(
                        "data URL is not base64 encoded".to_string(),
                    ));
                }
                data
            }
            None => encoded,
        };
        let bytes = Base64Codec::new().decode_str(payload)?;
        self.decode_image(&bytes)
    }
}

impl Codec for ImageCodec {
    fn name(&self) -> &'static str {
        "image"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[mime::IMAGE_JPEG, mime::IMAGE_PNG, mime::IMAGE_GIF]
    }

    fn encode(&self, value: &CodecValue) -> Result<Vec<u8>, CodecError> {
        match value {
            CodecValue::Image(decoded) => self.encode_as(&decoded.image, &self.output_format),
            other => Err(CodecError::UnsupportedInput {
                codec: self.name(),
                input: other.type_name(),
            }),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<CodecValue, CodecError> {
        self.decode_image(data).map(CodecValue::Image)
    }

    fn validate(&self, value: &CodecValue) -> Result<(), CodecError> {
        match value {
            CodecValue::Image(decoded) if decoded.image.width() > 0 && decoded.image.height() > 0 => {
                Ok(())
            }
            CodecValue::Image(_) => Err(CodecError::InvalidData("image has no pixels".to_string())),
            other => Err(CodecError::UnsupportedInput {
                codec: self.name(),
                input: other.type_name(),
            }),
        }
    }
}

fn is_jpeg_name(format: &str) -> bool {
    format.eq_ignore_ascii_case("jpeg") || format.eq_ignore_ascii_case("jpg")
}

fn format_name(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    fn sample(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbaImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            #[allow(clippy::cast_possible_truncation)]
            let v = ((x + y) % 256) as u8;
            *px = Rgba([v, 255 - v, 0, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        ImageCodec::default().encode_as(&sample(width, height), "png").unwrap()
    }

    #[test]
    fn png_roundtrip_preserves_pixels() {
        let codec = ImageCodec::default();
        let original = sample(4, 3);
        let bytes = codec.encode_as(&original, "png").unwrap();
        let decoded = codec.decode_image(&bytes).unwrap();
        assert_eq!(decoded.format, "png");
        assert_eq!(decoded.image.to_rgba8(), original.to_rgba8());
    }

    #[test]
    fn jpeg_output_is_detected_as_jpeg() {
        let codec = ImageCodec::new("jpeg", 90);
        let bytes = codec
            .encode(&CodecValue::Image(DecodedImage {
                image: sample(8, 8),
                format: "png".into(),
            }))
            .unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8, 0xFF]));
        assert_eq!(codec.decode_image(&bytes).unwrap().format, "jpeg");
    }

    #[test]
    fn unknown_output_format_falls_back_to_png() {
        let codec = ImageCodec::new("webp", 50);
        let bytes = codec
            .encode(&CodecValue::Image(DecodedImage {
                image: sample(2, 2),
                format: "gif".into(),
            }))
            .unwrap();
        assert!(bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(ImageCodec::new("jpeg", 0).quality(), 1);
        assert_eq!(ImageCodec::new("jpeg", 200).quality(), 100);
    }

    #[test]
    fn info_reports_dimensions_and_ratio() {
        let bytes = png_bytes(6, 3);
        let info = ImageCodec::default().image_info(&bytes).unwrap();
        assert_eq!(info.format, "png");
        assert_eq!((info.width, info.height), (6, 3));
        assert_eq!(info.color_model, "Rgba8");
        assert_eq!(info.size, bytes.len());
        assert_eq!(info.aspect_ratio, Some(2.0));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(ImageCodec::default().decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn resize_is_exact() {
        let codec = ImageCodec::default();
        let resized = codec.resize(&sample(10, 4), 5, 7).unwrap();
        assert_eq!((resized.width(), resized.height()), (5, 7));
        assert!(codec.resize(&sample(2, 2), 0, 1).is_err());
    }

    #[test]
    fn crop_copies_pixels_and_checks_bounds() {
        let codec = ImageCodec::default();
        let src = sample(10, 10);
        let cropped = codec.crop(&src, 2, 3, 4, 5).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (4, 5));
        assert_eq!(cropped.to_rgba8().get_pixel(0, 0), src.to_rgba8().get_pixel(2, 3));

        assert!(codec.crop(&src, 8, 0, 3, 1).is_err());
        assert!(codec.crop(&src, 0, 9, 1, 2).is_err());
        assert!(codec.crop(&src, u32::MAX, 0, 2, 1).is_err());
    }

    #[test]
    fn data_url_roundtrip() {
        let codec = ImageCodec::default();
        let decoded = codec.decode_image(&png_bytes(3, 3)).unwrap();
        let url = codec.to_base64(&decoded, None).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let back = codec.from_base64(&url).unwrap();
        assert_eq!(back.format, "png");
        assert_eq!(back.image.to_rgba8(), decoded.image.to_rgba8());
    }

    #[test]
    fn from_base64_accepts_bare_payload() {
        let codec = ImageCodec::default();
        let bare = Base64Codec::new().encode_bytes(&png_bytes(2, 2));
        assert_eq!(codec.from_base64(&bare).unwrap().format, "png");
    }

    #[test]
    fn validate_requires_image_input() {
        let codec = ImageCodec::default();
        let err = codec.validate(&CodecValue::Text("x".into())).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedInput { codec: "image", .. }));
    }
}
