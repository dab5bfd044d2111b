//! Transport codec for images sent by the mobile client.
//!
//! Payloads arrive as base64 text, optionally wrapped in a data URI
//! (`data:image/jpeg;base64,...`), and responses carry the image back the
//! same way.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ColorType, DynamicImage, ImageFormat, ImageReader};
use sha2::{Digest, Sha256};
use std::io::Cursor;

pub const MIN_DIMENSION: u32 = 32;
pub const MAX_DIMENSION: u32 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFormat {
    Jpeg,
    Png,
}

impl EncodeFormat {
    fn image_format(self) -> ImageFormat {
        match self {
            EncodeFormat::Jpeg => ImageFormat::Jpeg,
            EncodeFormat::Png => ImageFormat::Png,
        }
    }
}

pub struct DecodedImage {
    pub image: DynamicImage,
    /// `sha256:<hex>` of the encoded bytes; stored instead of the pixels.
    pub content_ref: String,
}

pub fn decode(payload: &str) -> Result<DecodedImage, CodecError> {
    let data = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };
    // Android's default base64 flags wrap lines every 76 characters.
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(CodecError::Decode("empty image payload".to_string()));
    }

    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| CodecError::Decode(format!("invalid base64: {e}")))?;
    decode_bytes(&bytes)
}

pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage, CodecError> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(format!("failed to guess image format: {e}")))?
        .decode()
        .map_err(|e| CodecError::Decode(format!("unreadable image data: {e}")))?;

    Ok(DecodedImage {
        image,
        content_ref: content_ref(bytes),
    })
}

pub fn content_ref(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn encode(image: &DynamicImage, format: EncodeFormat) -> Result<String, CodecError> {
    let converted;
    let source = match (format, image.color()) {
        (EncodeFormat::Jpeg, ColorType::Rgb8 | ColorType::L8) => image,
        (EncodeFormat::Jpeg, _) => {
            converted = DynamicImage::ImageRgb8(image.to_rgb8());
            &converted
        }
        (EncodeFormat::Png, ColorType::Rgb32F | ColorType::Rgba32F) => {
            converted = DynamicImage::ImageRgba8(image.to_rgba8());
            &converted
        }
        (EncodeFormat::Png, _) => image,
    };

    let mut buffer = Vec::new();
    source
        .write_to(&mut Cursor::new(&mut buffer), format.image_format())
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(buffer))
}

pub fn validate(image: &DynamicImage) -> bool {
    let (width, height) = (image.width(), image.height());
    let size_ok = (MIN_DIMENSION..=MAX_DIMENSION).contains(&width)
        && (MIN_DIMENSION..=MAX_DIMENSION).contains(&height);
    // Channel layout decides, not bit depth: 16-bit and float images are still RGB.
    let mode_ok = matches!(
        image.color(),
        ColorType::Rgb8
            | ColorType::Rgb16
            | ColorType::Rgb32F
            | ColorType::Rgba8
            | ColorType::Rgba16
            | ColorType::Rgba32F
            | ColorType::L8
            | ColorType::L16
    );
    size_ok && mode_ok
}
