//! Bright-spot (flashlight / lighter) detection.
//!
//! Pipeline per frame:
//! 1. RGB → luminance (BT.601 weights, 14-bit fixed point).
//! 2. Binarize: luminance strictly above `bright_threshold` is foreground.
//! 3. Label maximal 8-connected foreground components in raster order.
//! 4. Keep only outer components: a component sitting inside a hole of
//!    another component is not reported.
//! 5. Drop components whose pixel count is `<= min_area`.
//!
//! The detector is stateless; the same frame and settings always produce the
//! same regions in the same order.

use crate::detect::result::{BoundingBox, FlashlightRegion};
use crate::error::PipelineError;
use crate::frame::{Frame, CHANNELS};

pub const DEFAULT_BRIGHT_THRESHOLD: u8 = 220;
pub const DEFAULT_MIN_AREA: f32 = 30.0;

#[derive(Clone, Debug)]
pub struct BrightSpotDetector {
    bright_threshold: u8,
    min_area: f32,
}

impl Default for BrightSpotDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BRIGHT_THRESHOLD, DEFAULT_MIN_AREA)
    }
}

impl BrightSpotDetector {
    pub fn new(bright_threshold: u8, min_area: f32) -> Self {
        Self {
            bright_threshold,
            min_area,
        }
    }

    pub fn bright_threshold(&self) -> u8 {
        self.bright_threshold
    }

    pub fn min_area(&self) -> f32 {
        self.min_area
    }

    /// Find bright light sources in `frame`.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<FlashlightRegion>, PipelineError> {
        let luma = luminance(frame)?;
        let width = frame.width as usize;
        let height = frame.height as usize;
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let mask: Vec<bool> = luma.iter().map(|&v| v > self.bright_threshold).collect();
        let outside = outer_background(&mask, width, height);

        let mut visited = vec![false; mask.len()];
        let mut stack = Vec::new();
        let mut regions = Vec::new();

        for seed in 0..mask.len() {
            if !mask[seed] || visited[seed] {
                continue;
            }
            let seed_x = seed % width;
            // The seed is the first pixel of its component in raster order, so its
            // left neighbour is background and belongs to the region enclosing it.
            let is_outer = seed_x == 0 || outside[seed - 1];

            let component = flood_component(seed, &mask, &mut visited, &mut stack, width, height);

            if !is_outer {
                log::trace!(
                    "bright-spot: skipping nested component at ({}, {})",
                    component.bbox.x,
                    component.bbox.y
                );
                continue;
            }
            if component.area <= self.min_area {
                continue;
            }
            regions.push(component);
        }

        Ok(regions)
    }
}

/// Single-channel intensity plane of `frame`.
pub fn luminance(frame: &Frame) -> Result<Vec<u8>, PipelineError> {
    let expected = frame.expected_len().ok_or_else(|| {
        PipelineError::UnreadableFrame(format!(
            "frame {} dimensions {}x{} overflow",
            frame.index, frame.width, frame.height
        ))
    })?;
    let pixels = frame.pixels();
    if pixels.len() != expected {
        return Err(PipelineError::UnreadableFrame(format!(
            "frame {} expected {} RGB bytes, received {}",
            frame.index,
            expected,
            pixels.len()
        )));
    }

    Ok(pixels
        .chunks_exact(CHANNELS)
        .map(|rgb| luma_bt601(rgb[0], rgb[1], rgb[2]))
        .collect())
}

#[inline]
fn luma_bt601(r: u8, g: u8, b: u8) -> u8 {
    // 0.299 / 0.587 / 0.114 scaled by 2^14, rounded.
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14) as u8
}

/// Marks background pixels 4-connected to the frame border.
///
/// Background reachable from outside the frame is the "outer" background;
/// every other background region is a hole inside some component.
fn outer_background(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut outside = vec![false; mask.len()];
    let mut stack = Vec::new();

    for x in 0..width {
        mark_background(x, mask, &mut outside, &mut stack);
        mark_background((height - 1) * width + x, mask, &mut outside, &mut stack);
    }
    for y in 0..height {
        mark_background(y * width, mask, &mut outside, &mut stack);
        mark_background(y * width + width - 1, mask, &mut outside, &mut stack);
    }

    while let Some(idx) = stack.pop() {
        let x = idx % width;
        let y = idx / width;
        if x > 0 {
            mark_background(idx - 1, mask, &mut outside, &mut stack);
        }
        if x + 1 < width {
            mark_background(idx + 1, mask, &mut outside, &mut stack);
        }
        if y > 0 {
            mark_background(idx - width, mask, &mut outside, &mut stack);
        }
        if y + 1 < height {
            mark_background(idx + width, mask, &mut outside, &mut stack);
        }
    }

    outside
}

#[inline]
fn mark_background(idx: usize, mask: &[bool], outside: &mut [bool], stack: &mut Vec<usize>) {
    if !mask[idx] && !outside[idx] {
        outside[idx] = true;
        stack.push(idx);
    }
}

/// Collects the 8-connected component containing `seed`.
fn flood_component(
    seed: usize,
    mask: &[bool],
    visited: &mut [bool],
    stack: &mut Vec<usize>,
    width: usize,
    height: usize,
) -> FlashlightRegion {
    let mut min_x = seed % width;
    let mut max_x = min_x;
    let mut min_y = seed / width;
    let mut max_y = min_y;
    let mut area = 0u64;

    visited[seed] = true;
    stack.push(seed);

    while let Some(idx) = stack.pop() {
        let x = idx % width;
        let y = idx / width;
        area += 1;
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);

        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let n = ny * width + nx;
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }
    }

    FlashlightRegion {
        bbox: BoundingBox::new(
            min_x as i32,
            min_y as i32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        ),
        area: area as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 3] = [255, 255, 255];

    fn dark_frame(width: u32, height: u32) -> Vec<u8> {
        vec![12u8; (width * height * 3) as usize]
    }

    fn paint(pixels: &mut [u8], frame_width: u32, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        for py in y..y + h {
            for px in x..x + w {
                let idx = ((py * frame_width + px) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&rgb);
            }
        }
    }

    fn frame_with(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> Frame {
        let mut pixels = dark_frame(width, height);
        for &(x, y, w, h) in rects {
            paint(&mut pixels, width, x, y, w, h, WHITE);
        }
        Frame::new(1, width, height, 0, pixels)
    }

    #[test]
    fn black_frame_has_no_regions() {
        let frame = Frame::filled(1, 64, 48, [0, 0, 0]);
        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn saturated_frame_is_one_region() {
        let frame = Frame::filled(1, 20, 10, WHITE);
        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(0, 0, 20, 10));
        assert_eq!(regions[0].area, 200.0);
    }

    #[test]
    fn square_above_min_area_is_reported_pixel_exact() {
        // 5 x 10 = 50 pixels
        let frame = frame_with(64, 48, &[(17, 9, 5, 10)]);
        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(17, 9, 5, 10));
        assert_eq!(regions[0].area, 50.0);
    }

    #[test]
    fn small_spot_is_rejected_as_noise() {
        // 2 x 5 = 10 pixels
        let frame = frame_with(64, 48, &[(30, 30, 2, 5)]);
        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn area_equal_to_min_area_is_rejected() {
        // 5 x 6 = 30 pixels
        let frame = frame_with(64, 48, &[(4, 4, 5, 6)]);
        assert!(BrightSpotDetector::default().detect(&frame).unwrap().is_empty());
        // 31 pixels survives
        let frame = frame_with(64, 48, &[(4, 4, 5, 6), (9, 4, 1, 1)]);
        assert_eq!(BrightSpotDetector::default().detect(&frame).unwrap().len(), 1);
    }

    #[test]
    fn threshold_is_strict() {
        let mut pixels = dark_frame(16, 16);
        paint(&mut pixels, 16, 0, 0, 8, 8, [220, 220, 220]);
        let frame = Frame::new(1, 16, 16, 0, pixels);
        assert!(BrightSpotDetector::default().detect(&frame).unwrap().is_empty());

        let mut pixels = dark_frame(16, 16);
        paint(&mut pixels, 16, 0, 0, 8, 8, [221, 221, 221]);
        let frame = Frame::new(1, 16, 16, 0, pixels);
        assert_eq!(BrightSpotDetector::default().detect(&frame).unwrap().len(), 1);
    }

    #[test]
    fn diagonal_pixels_join_one_component() {
        let mut pixels = dark_frame(40, 40);
        // 6x6 block and another 6x6 block touching only at a corner
        paint(&mut pixels, 40, 2, 2, 6, 6, WHITE);
        paint(&mut pixels, 40, 8, 8, 6, 6, WHITE);
        let frame = Frame::new(1, 40, 40, 0, pixels);
        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(2, 2, 12, 12));
        assert_eq!(regions[0].area, 72.0);
    }

    #[test]
    fn separate_spots_are_reported_in_raster_order() {
        let frame = frame_with(80, 40, &[(60, 2, 8, 8), (5, 20, 8, 8)]);
        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].bbox.x, 60);
        assert_eq!(regions[1].bbox.x, 5);
    }

    #[test]
    fn spot_inside_a_ring_hole_is_not_reported() {
        let mut pixels = dark_frame(60, 60);
        // 30x30 ring with 2px wall
        paint(&mut pixels, 60, 10, 10, 30, 2, WHITE);
        paint(&mut pixels, 60, 10, 38, 30, 2, WHITE);
        paint(&mut pixels, 60, 10, 12, 2, 26, WHITE);
        paint(&mut pixels, 60, 38, 12, 2, 26, WHITE);
        // bright blob inside the hole
        paint(&mut pixels, 60, 20, 20, 8, 8, WHITE);
        let frame = Frame::new(1, 60, 60, 0, pixels);

        let regions = BrightSpotDetector::default().detect(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(10, 10, 30, 30));
        assert_eq!(regions[0].area, (30 * 2 * 2 + 26 * 2 * 2) as f32);
    }

    #[test]
    fn detection_is_deterministic() {
        let frame = frame_with(64, 48, &[(1, 1, 7, 7), (40, 30, 9, 6), (20, 10, 2, 2)]);
        let detector = BrightSpotDetector::default();
        let first = detector.detect(&frame).unwrap();
        let second = detector.detect(&frame).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn malformed_frame_is_unreadable() {
        let frame = Frame::new(9, 10, 10, 0, vec![0u8; 17]);
        let err = BrightSpotDetector::default().detect(&frame).unwrap_err();
        assert!(matches!(err, PipelineError::UnreadableFrame(_)));
    }

    #[test]
    fn luminance_uses_bt601_weights() {
        assert_eq!(luma_bt601(255, 255, 255), 255);
        assert_eq!(luma_bt601(0, 0, 0), 0);
        assert_eq!(luma_bt601(255, 0, 0), 76);
        assert_eq!(luma_bt601(0, 255, 0), 150);
        assert_eq!(luma_bt601(0, 0, 255), 29);
    }
}
