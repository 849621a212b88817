//! Image transformation: staged bytes → resized PNG → base64.
//!
//! Decoding and resampling are CPU-bound, so the work runs inside
//! `tokio::task::spawn_blocking` to keep the async workers free.

use crate::error::EntryError;
use crate::pipeline::encode::{encode_base64, encode_png};
use crate::pipeline::staging::StagingArea;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Default target width in pixels.
pub const DEFAULT_WIDTH: u32 = 500;

/// Turns a staged image into the base64 payload sent for recognition.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Load the bytes staged for `id`, resize to `width`, re-encode, and
    /// return the base64 text.
    async fn transform(
        &self,
        staging: &StagingArea,
        id: &str,
        width: u32,
    ) -> Result<String, EntryError>;
}

/// Lanczos resize to a fixed width, lossless PNG output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngTransformer;

#[async_trait]
impl ImageTransformer for PngTransformer {
    async fn transform(
        &self,
        staging: &StagingArea,
        id: &str,
        width: u32,
    ) -> Result<String, EntryError> {
        let path = staging.path_for(id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| EntryError::Transform {
            id: id.to_string(),
            detail: format!("cannot read {}: {}", path.display(), e),
        })?;

        let owned_id = id.to_string();
        let png = tokio::task::spawn_blocking(move || resize_to_png(&owned_id, &bytes, width))
            .await
            .map_err(|e| EntryError::Transform {
                id: id.to_string(),
                detail: format!("resize task panicked: {e}"),
            })??;

        encode_base64(&png)
    }
}

/// Decode `bytes`, scale to `width` keeping the aspect ratio, encode as PNG.
pub fn resize_to_png(id: &str, bytes: &[u8], width: u32) -> Result<Vec<u8>, EntryError> {
    let transform_err = |detail: String| EntryError::Transform {
        id: id.to_string(),
        detail,
    };

    if bytes.is_empty() {
        return Err(transform_err("staged image is empty".into()));
    }

    let img = image::load_from_memory(bytes).map_err(|e| transform_err(format!("decode: {e}")))?;
    let resized = resize_to_width(&img, width).ok_or_else(|| {
        transform_err(format!(
            "{}x{} cannot be scaled to width {}",
            img.width(),
            img.height(),
            width
        ))
    })?;
    debug!(
        "Resized {} from {}x{} to {}x{}",
        id,
        img.width(),
        img.height(),
        resized.width(),
        resized.height()
    );

    let png = encode_png(&resized).map_err(|e| transform_err(format!("encode: {e}")))?;
    if png.is_empty() {
        return Err(transform_err("encoder produced no output".into()));
    }
    Ok(png)
}

/// Scale to exactly `width` pixels wide; height follows the aspect ratio.
///
/// `None` when the scaled height does not fit in a `u32`.
fn resize_to_width(img: &DynamicImage, width: u32) -> Option<DynamicImage> {
    let width = width.max(1);
    if img.width() == width {
        return Some(img.clone());
    }
    let height = scaled_height(img.width(), img.height(), width)?;
    Some(img.resize_exact(width, height, FilterType::Lanczos3))
}

/// Height for `width` preserving the `src_w`:`src_h` ratio, rounded, at least 1.
fn scaled_height(src_w: u32, src_h: u32, width: u32) -> Option<u32> {
    let h = (src_h as u64 * width as u64 + src_w as u64 / 2) / src_w.max(1) as u64;
    u32::try_from(h.max(1)).ok()
}
