//! Decoding of transport-encoded captures into RGB buffers.

use image::{ImageError, ImageReader, Limits, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Largest accepted width or height. Kiosk cameras are far below this.
const MAX_DIMENSION: u32 = 8192;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("empty image payload")]
    Empty,
    #[error("undecodable image: {0}")]
    Decode(#[from] ImageError),
    #[error("image exceeds {} pixels per side", MAX_DIMENSION)]
    TooLarge,
    #[error("reading image payload: {0}")]
    Io(#[from] std::io::Error),
    #[error("image has no pixels")]
    NoPixels,
    #[error("decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Decode any format the `image` crate understands (JPEG, PNG, ...) into RGB8.
///
/// Oversized images are refused from their header, before pixel buffers are
/// allocated.
pub fn decode_capture(bytes: &[u8]) -> Result<RgbImage, IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::Empty);
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);

    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(limits);
    let image = match reader.decode() {
        Ok(image) => image,
        Err(ImageError::Limits(_)) => return Err(IngestError::TooLarge),
        Err(e) => return Err(e.into()),
    };
    if image.width() == 0 || image.height() == 0 {
        return Err(IngestError::NoPixels);
    }
    Ok(image.to_rgb8())
}

/// [`decode_capture`] on the blocking pool.
pub async fn decode(bytes: Vec<u8>) -> Result<RgbImage, IngestError> {
    tokio::task::spawn_blocking(move || decode_capture(&bytes)).await?
}
