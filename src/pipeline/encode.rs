//! Image encoding: `DynamicImage` → PNG bytes → base64 text.
//!
//! PNG output is lossless; the encoder runs at its best compression level.

use crate::error::EntryError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::DynamicImage;
use tracing::debug;

/// Encode an image as PNG at maximum compression.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
    img.write_with_encoder(encoder)?;
    debug!("Encoded {}x{} image → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Base64-encode raw bytes for an inline data URI.
///
/// An empty buffer has no image in it and is rejected.
pub fn encode_base64(bytes: &[u8]) -> Result<String, EntryError> {
    if bytes.is_empty() {
        return Err(EntryError::Encoding("buffer is empty".into()));
    }
    Ok(STANDARD.encode(bytes))
}
