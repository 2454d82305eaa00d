//! Annotated snapshots and the optional local preview.
//!
//! `annotate` never touches the source frame. It paints a copy with labelled
//! person boxes in green, labelled flashlight boxes in red and a status banner
//! carrying the latest counts across the top.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, Detection, FlashlightRegion};
use crate::frame::{encode_jpeg, Frame};
use crate::status::{MetricsSnapshot, SafetyStatus};

pub const PERSON_COLOR: [u8; 3] = [0, 255, 0];
pub const FLASHLIGHT_COLOR: [u8; 3] = [255, 0, 0];
pub const SAFE_BANNER: [u8; 3] = [0, 160, 0];
pub const DANGER_BANNER: [u8; 3] = [200, 0, 0];
pub const BANNER_TEXT_COLOR: [u8; 3] = [255, 255, 255];

const BOX_THICKNESS: u32 = 2;
pub const BANNER_HEIGHT: u32 = 18;
const BANNER_TEXT_SCALE: f32 = 14.0;
const LABEL_SCALE: f32 = 13.0;
const LABEL_HEIGHT: i32 = 14;

static LABEL_FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono.ttf");

/// Bundled label font, parsed once. `None` if the bundled bytes do not parse,
/// in which case boxes and the banner are still drawn.
fn label_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(LABEL_FONT_BYTES) {
        Ok(font) => Some(font),
        Err(err) => {
            log::error!("preview: bundled label font unusable, drawing without text: {}", err);
            None
        }
    })
    .as_ref()
}

/// Annotated copy of `frame`.
///
/// The banner shows `metrics`, which may carry a reused person count, so it
/// can differ from `people.len()`.
pub fn annotate(
    frame: &Frame,
    people: &[Detection],
    lights: &[FlashlightRegion],
    metrics: &MetricsSnapshot,
) -> Frame {
    frame.copy_with(|image| {
        let font = label_font();
        for person in people {
            outline(image, &person.bbox, PERSON_COLOR);
        }
        for light in lights {
            outline(image, &light.bbox, FLASHLIGHT_COLOR);
        }
        if let Some(font) = font {
            for person in people {
                label(image, font, &person.bbox, &person_label(person), PERSON_COLOR);
            }
            for light in lights {
                label(image, font, &light.bbox, "FLASHLIGHT", FLASHLIGHT_COLOR);
            }
        }
        banner(image, font, metrics);
    })
}

/// Counts line drawn in the banner.
pub fn counts_line(metrics: &MetricsSnapshot) -> String {
    format!(
        "{} | PEOPLE: {} | FLASHLIGHTS: {}",
        metrics.status, metrics.person_count, metrics.flashlight_count
    )
}

fn person_label(person: &Detection) -> String {
    match person.confidence {
        Some(confidence) => format!("Person {:.2}", confidence),
        None => "Person".to_string(),
    }
}

fn rect(x: i32, y: i32, width: u32, height: u32) -> Option<Rect> {
    (width > 0 && height > 0).then(|| Rect::at(x, y).of_size(width, height))
}

fn outline(image: &mut RgbImage, bbox: &BoundingBox, rgb: [u8; 3]) {
    for inset in 0..BOX_THICKNESS {
        let shrink = inset * 2;
        if bbox.width <= shrink || bbox.height <= shrink {
            break;
        }
        if let Some(r) = rect(
            bbox.x.saturating_add(inset as i32),
            bbox.y.saturating_add(inset as i32),
            bbox.width - shrink,
            bbox.height - shrink,
        ) {
            draw_hollow_rect_mut(image, r, Rgb(rgb));
        }
    }
}

/// Text just above the box, or just below it when the top would run under
/// the banner.
fn label(
    image: &mut RgbImage,
    font: &FontRef<'_>,
    bbox: &BoundingBox,
    text: &str,
    rgb: [u8; 3],
) {
    let above = bbox.y.saturating_sub(LABEL_HEIGHT + 1);
    let y = if above >= BANNER_HEIGHT as i32 {
        above
    } else {
        (bbox.bottom() + 1).min(i32::MAX as i64) as i32
    };
    draw_text_mut(image, Rgb(rgb), bbox.x, y, PxScale::from(LABEL_SCALE), font, text);
}

fn banner(image: &mut RgbImage, font: Option<&FontRef<'_>>, metrics: &MetricsSnapshot) {
    let color = match metrics.status {
        SafetyStatus::Safe => SAFE_BANNER,
        SafetyStatus::Danger => DANGER_BANNER,
    };
    let height = BANNER_HEIGHT.min(image.height());
    if let Some(r) = rect(0, 0, image.width(), height) {
        draw_filled_rect_mut(image, r, Rgb(color));
    }
    if let Some(font) = font {
        draw_text_mut(
            image,
            Rgb(BANNER_TEXT_COLOR),
            4,
            2,
            PxScale::from(BANNER_TEXT_SCALE),
            font,
            &counts_line(metrics),
        );
    }
}

/// Where the latest annotated frame is shown locally.
pub trait PreviewSink {
    fn render(&mut self, frame: &Frame) -> Result<()>;

    /// Release the sink. Called once at STOPPING.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: PreviewSink + ?Sized> PreviewSink for Box<T> {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        (**self).render(frame)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Writes the preview as a JPEG file, rate limited to one write per
/// `min_interval`.
#[derive(Debug)]
pub struct FilePreview {
    path: PathBuf,
    min_interval: Duration,
    quality: u8,
    last_write: Option<Instant>,
    writes: u64,
}

impl FilePreview {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration, quality: u8) -> Self {
        Self {
            path: path.into(),
            min_interval,
            quality,
            last_write: None,
            writes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl PreviewSink for FilePreview {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        if let Some(last) = self.last_write {
            if last.elapsed() < self.min_interval {
                return Ok(());
            }
        }
        let jpeg = encode_jpeg(frame, self.quality)?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("create {}", tmp_path.display()))?;
            file.write_all(&jpeg)?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace preview {}", self.path.display()))?;
        self.last_write = Some(Instant::now());
        self.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::info!(
            "preview: closed {} after {} writes",
            self.path.display(),
            self.writes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS;

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let at = (y as usize * frame.width as usize + x as usize) * CHANNELS;
        let p = &frame.pixels()[at..at + CHANNELS];
        [p[0], p[1], p[2]]
    }

    fn region_has(
        frame: &Frame,
        xs: std::ops::Range<u32>,
        ys: std::ops::Range<u32>,
        f: impl Fn([u8; 3]) -> bool,
    ) -> bool {
        ys.clone().any(|y| xs.clone().any(|x| f(pixel(frame, x, y))))
    }

    fn person(x: i32, y: i32, w: u32, h: u32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, y, w, h),
            confidence: Some(0.9),
            label: "person".to_string(),
        }
    }

    fn metrics(person_count: u32, flashlight_count: u32, status: SafetyStatus) -> MetricsSnapshot {
        MetricsSnapshot {
            person_count,
            flashlight_count,
            status,
            timestamp: 1,
        }
    }

    #[test]
    fn bundled_font_parses() {
        assert!(label_font().is_some());
    }

    #[test]
    fn source_frame_is_not_mutated() {
        let frame = Frame::filled(1, 80, 60, [0, 0, 0]);
        let annotated = annotate(
            &frame,
            &[person(10, 30, 8, 8)],
            &[],
            &metrics(1, 0, SafetyStatus::Danger),
        );
        assert!(frame.pixels().iter().all(|&p| p == 0));
        assert_ne!(annotated.pixels(), frame.pixels());
    }

    #[test]
    fn boxes_and_banner_use_their_colors() {
        let frame = Frame::filled(1, 160, 120, [0, 0, 0]);
        let light = FlashlightRegion {
            bbox: BoundingBox::new(100, 60, 10, 10),
            area: 100.0,
        };
        let annotated = annotate(
            &frame,
            &[person(20, 50, 30, 30)],
            &[light],
            &metrics(1, 1, SafetyStatus::Safe),
        );

        assert_eq!(pixel(&annotated, 20, 50), PERSON_COLOR);
        assert_eq!(pixel(&annotated, 21, 51), PERSON_COLOR);
        assert_eq!(pixel(&annotated, 49, 79), PERSON_COLOR);
        assert_eq!(pixel(&annotated, 35, 70), [0, 0, 0]);
        assert_eq!(pixel(&annotated, 100, 60), FLASHLIGHT_COLOR);
        assert_eq!(pixel(&annotated, 159, 0), SAFE_BANNER);
        assert_eq!(pixel(&annotated, 159, BANNER_HEIGHT), [0, 0, 0]);
    }

    #[test]
    fn labels_are_drawn_above_boxes() {
        let frame = Frame::filled(1, 160, 120, [0, 0, 0]);
        let none = metrics(0, 0, SafetyStatus::Safe);
        let bare = annotate(&frame, &[], &[], &none);
        let labelled = annotate(&frame, &[person(20, 60, 30, 30)], &[], &none);

        let label_rows = (60 - LABEL_HEIGHT as u32 - 1)..60;
        assert!(!region_has(&bare, 20..80, label_rows.clone(), |p| p != [0, 0, 0]));
        assert!(region_has(&labelled, 20..80, label_rows, |p| p != [0, 0, 0]));
    }

    #[test]
    fn banner_carries_the_counts() {
        let frame = Frame::filled(1, 320, 60, [0, 0, 0]);
        let few = annotate(&frame, &[], &[], &metrics(3, 0, SafetyStatus::Safe));
        let many = annotate(&frame, &[], &[], &metrics(12, 0, SafetyStatus::Safe));

        assert!(region_has(&few, 0..320, 0..BANNER_HEIGHT, |p| p != SAFE_BANNER));
        assert_ne!(
            &few.pixels()[..(320 * BANNER_HEIGHT) as usize * CHANNELS],
            &many.pixels()[..(320 * BANNER_HEIGHT) as usize * CHANNELS]
        );
        assert_eq!(
            counts_line(&metrics(12, 2, SafetyStatus::Danger)),
            "DANGER | PEOPLE: 12 | FLASHLIGHTS: 2"
        );
    }

    #[test]
    fn boxes_past_the_edge_are_clipped() {
        let frame = Frame::filled(1, 60, 60, [0, 0, 0]);
        let annotated = annotate(
            &frame,
            &[person(-5, 40, 30, 30)],
            &[],
            &metrics(1, 0, SafetyStatus::Danger),
        );
        assert_eq!(pixel(&annotated, 0, 40), PERSON_COLOR);
        assert_eq!(pixel(&annotated, 0, 0), DANGER_BANNER);
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let frame = Frame::filled(1, 3, 2, [0, 0, 0]);
        let annotated = annotate(
            &frame,
            &[person(0, 0, 1, 1), person(1, 1, 0, 5)],
            &[],
            &metrics(2, 0, SafetyStatus::Safe),
        );
        assert_eq!(pixel(&annotated, 2, 1), SAFE_BANNER);
    }

    #[test]
    fn file_preview_is_rate_limited() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("preview.jpg");
        let mut sink = FilePreview::new(&path, Duration::from_secs(3600), 80);
        let frame = Frame::filled(1, 16, 16, [10, 10, 10]);

        sink.render(&frame)?;
        sink.render(&frame)?;

        assert_eq!(sink.writes(), 1);
        assert!(path.exists());
        sink.close()?;
        Ok(())
    }
}
