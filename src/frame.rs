//! Request-scoped frame container.
//!
//! - `Frame`: Immutable RGB8 pixel buffer decoded from uploaded bytes. Pixels are private.
//! - `Frame::run_detector`: The only path that hands pixels to a detector, as a read-only slice.
//!
//! A frame lives for exactly one request. Nothing in the crate keeps a "current frame";
//! every request decodes its own and drops it once the response has been built.

use image::{ImageReader, RgbImage};
use std::io::Cursor;

use crate::detect::{DetectorBackend, RawDetection};
use crate::error::DetectionFailure;

/// Upper bound on decoded pixels, checked before allocating the RGB buffer.
pub const MAX_FRAME_PIXELS: u64 = 40_000_000;

/// Immutable decoded frame. There is no `AsMut<[u8]>` and no way to swap pixels in place.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Decode an uploaded image (JPEG, PNG, BMP). The format is sniffed from the bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DetectionFailure> {
        if bytes.is_empty() {
            return Err(DetectionFailure::invalid_image("image payload is empty"));
        }
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DetectionFailure::invalid_image(format!("unreadable image: {e}")))?;
        if reader.format().is_none() {
            return Err(DetectionFailure::invalid_image(
                "unsupported image format; use JPG, PNG or BMP",
            ));
        }
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| DetectionFailure::invalid_image(format!("corrupt image header: {e}")))?;
        if u64::from(width) * u64::from(height) > MAX_FRAME_PIXELS {
            return Err(DetectionFailure::invalid_image(format!(
                "image too large: {}x{} exceeds {} pixels",
                width, height, MAX_FRAME_PIXELS
            )));
        }
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DetectionFailure::invalid_image(format!("unreadable image: {e}")))?
            .decode()
            .map_err(|e| DetectionFailure::invalid_image(format!("corrupt image: {e}")))?;
        Ok(Self::from_rgb_image(image.into_rgb8()))
    }

    /// Wrap an already decoded image.
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    /// Build a frame from packed RGB24 bytes (camera frames arrive this way).
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, DetectionFailure> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| DetectionFailure::invalid_image("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(DetectionFailure::invalid_image(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Run a detector backend on this frame.
    ///
    /// The backend receives a borrowed slice. It cannot keep it past the call
    /// and cannot write through it.
    pub fn run_detector<B: DetectorBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> anyhow::Result<Vec<RawDetection>> {
        backend.detect(&self.data, self.width, self.height)
    }

    /// Copy of the pixels as an `RgbImage`, for annotation output.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length was checked at construction.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
