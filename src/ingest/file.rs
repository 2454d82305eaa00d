//! Local image directory source.
//!
//! Reads the JPEG/PNG stills of one directory in file-name order, one per
//! frame, paced to the target frame rate. Subdirectories and other files are
//! ignored. With `loop_files` the directory is replayed from the start when
//! exhausted; otherwise the stream ends. A still that cannot be read or
//! decoded is skipped with a warning; the source only fails when a full pass
//! over the directory yields nothing.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use super::{frame_interval, FrameSource, SourceSettings, SourceStats};
use crate::frame::{decode_image, Frame};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    target_fps: u32,
    loop_files: bool,
    frame_limit: Option<u64>,
    files: Vec<PathBuf>,
    cursor: usize,
    connected: bool,
    frame_count: u64,
    skipped_files: u64,
    last_frame_at: Option<Instant>,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>, settings: &SourceSettings) -> Self {
        Self {
            dir: dir.into(),
            target_fps: settings.target_fps,
            loop_files: settings.loop_files,
            frame_limit: settings.frame_limit,
            files: Vec::new(),
            cursor: 0,
            connected: false,
            frame_count: 0,
            skipped_files: 0,
            last_frame_at: None,
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Stills skipped because they could not be read or decoded.
    pub fn skipped_files(&self) -> u64 {
        self.skipped_files
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        self.files = list_images(&self.dir)?;
        if self.files.is_empty() {
            return Err(anyhow!("no jpeg/png images in {}", self.dir.display()));
        }
        self.cursor = 0;
        self.connected = true;
        log::info!(
            "ImageDirSource: connected to {} ({} images)",
            self.dir.display(),
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("image directory source not connected; call connect() first"));
        }
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let mut failures = 0usize;
        loop {
            if self.cursor >= self.files.len() {
                if !self.loop_files {
                    return Ok(None);
                }
                self.cursor = 0;
            }
            let path = self.files[self.cursor].clone();
            self.cursor += 1;

            match load_image(&path) {
                Ok(image) => {
                    self.pace();
                    self.frame_count += 1;
                    return Ok(Some(Frame::from_rgb_image(
                        self.frame_count,
                        crate::now_s(),
                        image,
                    )));
                }
                Err(err) => {
                    self.skipped_files += 1;
                    failures += 1;
                    log::warn!("ImageDirSource: skipping {:#}", err);
                    if failures >= self.files.len() {
                        return Err(anyhow!(
                            "none of the {} images in {} could be decoded",
                            self.files.len(),
                            self.dir.display()
                        ));
                    }
                }
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        self.connected = false;
        self.files.clear();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.dir.display().to_string(),
        }
    }
}

fn load_image(path: &Path) -> Result<image::RgbImage> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    decode_image(&bytes).with_context(|| format!("decode {}", path.display()))
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("open image directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
