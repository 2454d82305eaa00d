//! Captured video frames.
//!
//! - `Frame`: one RGB8 pixel grid captured at a point in time. Immutable once
//!   produced; there is no `&mut` access to the pixels and no `Clone`.
//!   Annotation produces a new frame (see `crate::preview::annotate`).
//! - `encode_jpeg`: snapshot encoding for publishing and preview.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};

/// Bytes per pixel of the interleaved RGB8 layout every source produces.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured frame.
///
/// Explicitly NOT implementing `Clone`: a frame is owned by the stage that is
/// processing it and dropped at the end of its cycle.
pub struct Frame {
    /// Sequence number assigned by the source (1-based, strictly increasing).
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Capture time, seconds since epoch.
    pub captured_at_s: u64,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap raw interleaved RGB8 pixels.
    ///
    /// The buffer length is not checked here; consumers that index pixels
    /// validate it via [`Frame::expected_len`].
    pub fn new(index: u64, width: u32, height: u32, captured_at_s: u64, pixels: Vec<u8>) -> Self {
        Self {
            index,
            width,
            height,
            captured_at_s,
            pixels,
        }
    }

    /// Build a frame from a decoded image.
    pub fn from_rgb_image(index: u64, captured_at_s: u64, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(index, width, height, captured_at_s, image.into_raw())
    }

    /// Uniformly filled frame.
    pub fn filled(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(index, width, height, crate::now_s(), pixels)
    }

    /// Read-only pixel access.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Byte length an RGB8 buffer of these dimensions must have.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
    }

    /// True when the pixel buffer matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.expected_len() == Some(self.pixels.len())
    }

    /// Copy of this frame with `paint` applied to the copied pixels.
    ///
    /// A malformed frame is copied unpainted.
    pub(crate) fn copy_with(&self, paint: impl FnOnce(&mut RgbImage)) -> Frame {
        let image = self
            .is_well_formed()
            .then(|| RgbImage::from_raw(self.width, self.height, self.pixels.clone()))
            .flatten();
        match image {
            Some(mut image) => {
                paint(&mut image);
                Frame::from_rgb_image(self.index, self.captured_at_s, image)
            }
            None => Frame::new(
                self.index,
                self.width,
                self.height,
                self.captured_at_s,
                self.pixels.clone(),
            ),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is intentionally left out of debug output.
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at_s", &self.captured_at_s)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode a frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    if !frame.is_well_formed() {
        return Err(anyhow!(
            "frame {} has {} bytes, expected {}x{} RGB",
            frame.index,
            frame.pixels.len(),
            frame.width,
            frame.height
        ));
    }
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder
        .encode(
            frame.pixels(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("encode frame {} as jpeg", frame.index))?;
    Ok(bytes)
}

/// Decode JPEG/PNG bytes into RGB8 pixels.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode image")?;
    Ok(image.into_rgb8())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
