//! Synthetic crowd scene (`stub://<name>`).
//!
//! A dim, noisy background with a handful of mid-tone blobs standing in for
//! people. Every `FLARE_PERIOD` frames a small saturated disc appears at a
//! random position, which the bright-spot detector reports as one light.
//! The scene is seeded from the source name so runs are reproducible.

use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{frame_interval, FrameSource, SourceSettings, SourceStats};
use crate::frame::{Frame, CHANNELS};

pub const FLARE_PERIOD: u64 = 30;
const FLARE_RADIUS: i64 = 6;
const FIGURES: usize = 6;

pub struct SyntheticSource {
    settings: SourceSettings,
    rng: StdRng,
    figures: Vec<(u32, u32)>,
    connected: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        let seed = settings
            .url
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
            });
        Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
            figures: Vec::new(),
            connected: false,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn render(&mut self) -> Vec<u8> {
        let (width, height) = (self.settings.width, self.settings.height);
        let mut pixels = vec![0u8; width as usize * height as usize * CHANNELS];
        for px in pixels.chunks_exact_mut(CHANNELS) {
            let base = self.rng.gen_range(20u8..60);
            px.copy_from_slice(&[base, base, base.saturating_add(10)]);
        }

        // Figures drift a little every frame.
        for figure in self.figures.iter_mut() {
            let dx = self.rng.gen_range(-2i64..=2);
            figure.0 = (figure.0 as i64 + dx).clamp(0, width as i64 - 1) as u32;
        }
        for &(cx, cy) in &self.figures {
            paint_disc(&mut pixels, width, height, cx as i64, cy as i64, 10, [120, 90, 80]);
        }

        if self.frame_count % FLARE_PERIOD == 0 {
            let cx = self.rng.gen_range(0..width) as i64;
            let cy = self.rng.gen_range(0..height) as i64;
            paint_disc(
                &mut pixels,
                width,
                height,
                cx,
                cy,
                FLARE_RADIUS,
                [255, 255, 250],
            );
        }
        pixels
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.settings.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-empty frame size, got {}x{}",
                self.settings.width,
                self.settings.height
            ));
        }
        let (width, height) = (self.settings.width, self.settings.height);
        self.figures = (0..FIGURES)
            .map(|_| (self.rng.gen_range(0..width), self.rng.gen_range(0..height)))
            .collect();
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.settings.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if let Some(limit) = self.settings.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pace();
        self.frame_count += 1;
        let pixels = self.render();
        Ok(Some(Frame::new(
            self.frame_count,
            self.settings.width,
            self.settings.height,
            crate::now_s(),
            pixels,
        )))
    }

    fn release(&mut self) -> Result<()> {
        self.connected = false;
        log::info!("SyntheticSource: released {}", self.settings.url);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.url.clone(),
        }
    }
}

fn paint_disc(pixels: &mut [u8], width: u32, height: u32, cx: i64, cy: i64, r: i64, rgb: [u8; 3]) {
    let stride = width as usize * CHANNELS;
    for y in (cy - r).max(0)..=(cy + r).min(height as i64 - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(width as i64 - 1) {
            if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                let at = y as usize * stride + x as usize * CHANNELS;
                pixels[at..at + CHANNELS].copy_from_slice(&rgb);
            }
        }
    }
}
