//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic crowd scene (`stub://<name>`, testing and demos)
//! - Replay of frames held in memory (testing)
//! - Local image directory (sorted stills, optional looping)
//! - HTTP MJPEG / JPEG snapshot streams (IP and ESP32 cameras)
//! - Local video files via FFmpeg (feature `ingest-file-ffmpeg`)
//! - V4L2 cameras such as USB webcams (feature `ingest-v4l2`)
//!
//! Every source numbers frames 1, 2, 3, … in read order and signals
//! end-of-stream with `Ok(None)`. A source never hands out the same frame
//! twice; the pipeline owns each frame for exactly one cycle.

pub mod file;
pub mod memory;
pub mod mjpeg;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;
#[cfg(feature = "ingest-file-ffmpeg")]
pub mod video;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use file::ImageDirSource;
pub use memory::ReplaySource;
pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;
#[cfg(feature = "ingest-file-ffmpeg")]
pub use video::VideoFileSource;

/// Extensions routed to the video file source.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "avi", "mkv", "webm"];

/// Where frames come from and how fast.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// `stub://name`, `http(s)://…`, `v4l2://N`, `/dev/videoN`, a video file
    /// or a local directory path.
    pub url: String,
    /// Target frame rate. 0 disables pacing.
    pub target_fps: u32,
    /// Frame size of synthetic sources.
    pub width: u32,
    pub height: u32,
    /// Stop after this many frames (synthetic, directory and video file sources).
    pub frame_limit: Option<u64>,
    /// Restart a directory source at its first image when exhausted.
    pub loop_files: bool,
    pub timeout: Option<Duration>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://crowd".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            frame_limit: None,
            loop_files: false,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Sequential frame supplier consumed by the pipeline.
pub trait FrameSource {
    /// Acquire the underlying resource. Failure here is unrecoverable.
    fn connect(&mut self) -> Result<()>;

    /// Next frame in capture order, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource. Called once at STOPPING.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// What kind of source a url names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Http,
    ImageDir(PathBuf),
    VideoFile(PathBuf),
    Device(String),
}

/// Classify `url` without touching the filesystem or network.
pub fn classify(url: &str) -> Result<SourceKind> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("source url is empty"));
    }
    if url.starts_with("stub://") {
        return Ok(SourceKind::Synthetic);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(SourceKind::Http);
    }
    if let Some(device) = url.strip_prefix("v4l2://") {
        if device.is_empty() {
            return Err(anyhow!("v4l2 url {} names no device", url));
        }
        let device = match device.parse::<u32>() {
            Ok(index) => format!("/dev/video{}", index),
            Err(_) => device.to_string(),
        };
        return Ok(SourceKind::Device(device));
    }
    let path = if url.starts_with("file://") {
        url::Url::parse(url)?
            .to_file_path()
            .map_err(|_| anyhow!("file url {} has no local path", url))?
    } else if url.contains("://") {
        return Err(anyhow!(
            "unsupported source '{}'; expected stub://, http(s)://, v4l2://, file:// or a path",
            url
        ));
    } else {
        PathBuf::from(url)
    };
    if is_video_device(&path) {
        return Ok(SourceKind::Device(path.display().to_string()));
    }
    if is_video_file(&path) {
        return Ok(SourceKind::VideoFile(path));
    }
    Ok(SourceKind::ImageDir(path))
}

fn is_video_device(path: &Path) -> bool {
    path.to_str()
        .and_then(|p| p.strip_prefix("/dev/video"))
        .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Build the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    match classify(&settings.url)? {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(settings.clone()))),
        SourceKind::Http => Ok(Box::new(MjpegSource::new(settings.clone())?)),
        SourceKind::ImageDir(path) => Ok(Box::new(ImageDirSource::new(path, settings))),
        SourceKind::VideoFile(path) => open_video_file(path, settings),
        SourceKind::Device(device) => open_device(device, settings),
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_video_file(path: PathBuf, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(VideoFileSource::new(path, settings)))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_video_file(path: PathBuf, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "{} is a video file; rebuild with the ingest-file-ffmpeg feature",
        path.display()
    ))
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(device: String, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(device, settings)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(device: String, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "{} is a camera device; rebuild with the ingest-v4l2 feature",
        device
    ))
}

/// Minimum spacing between frames at `target_fps` (0 = unpaced).
pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// How long a live source may go without a frame and still count as healthy.
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            ..SourceSettings::default()
        }
    }

    #[test]
    fn dispatches_on_url() {
        assert_eq!(
            open_source(&settings("stub://crowd")).unwrap().stats().source,
            "stub://crowd"
        );
        assert!(open_source(&settings("http://127.0.0.1:81/stream")).is_ok());
        assert!(open_source(&settings("/var/lib/sentinel/frames")).is_ok());
        assert!(open_source(&settings("rtsp://camera/stream")).is_err());
        assert!(open_source(&settings("  ")).is_err());
    }

    #[test]
    fn classifies_cameras_and_video_files() {
        assert_eq!(
            classify("v4l2://0").unwrap(),
            SourceKind::Device("/dev/video0".to_string())
        );
        assert_eq!(
            classify("v4l2:///dev/video2").unwrap(),
            SourceKind::Device("/dev/video2".to_string())
        );
        assert_eq!(
            classify("/dev/video1").unwrap(),
            SourceKind::Device("/dev/video1".to_string())
        );
        assert!(classify("v4l2://").is_err());
        assert_eq!(
            classify("/srv/clips/test3.MP4").unwrap(),
            SourceKind::VideoFile(PathBuf::from("/srv/clips/test3.MP4"))
        );
        assert_eq!(
            classify("file:///srv/clips/night.mkv").unwrap(),
            SourceKind::VideoFile(PathBuf::from("/srv/clips/night.mkv"))
        );
        assert_eq!(
            classify("/srv/stills").unwrap(),
            SourceKind::ImageDir(PathBuf::from("/srv/stills"))
        );
        assert_eq!(
            classify("/dev/videos").unwrap(),
            SourceKind::ImageDir(PathBuf::from("/dev/videos"))
        );
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn video_file_without_ffmpeg_names_the_feature() {
        let err = open_source(&settings("/srv/clips/test3.mp4")).err().unwrap();
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn camera_without_v4l2_names_the_feature() {
        let err = open_source(&settings("v4l2://0")).err().unwrap();
        assert!(err.to_string().contains("ingest-v4l2"));
    }

    #[test]
    fn frame_interval_matches_fps() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(10), Duration::from_millis(2_000));
        assert_eq!(health_grace(1), Duration::from_millis(6_000));
    }
}
