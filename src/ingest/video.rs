//! Local video file source using FFmpeg.
//!
//! Decodes the best video track of a file (mp4, mkv, avi, …) to RGB frames in
//! memory. The file is opened at `connect`, so a missing or unreadable file is
//! an INIT failure. End of file is end of stream unless `loop_files` is set, in
//! which case the file is reopened from the start.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{frame_interval, health_grace, FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

pub struct VideoFileSource {
    path: PathBuf,
    target_fps: u32,
    frame_limit: Option<u64>,
    loop_files: bool,
    decoder: Option<VideoDecoder>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

struct VideoDecoder {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
}

impl VideoFileSource {
    pub fn new(path: impl Into<PathBuf>, settings: &SourceSettings) -> Self {
        Self {
            path: path.into(),
            target_fps: settings.target_fps,
            frame_limit: settings.frame_limit,
            loop_files: settings.loop_files,
            decoder: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
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

    fn decode_next(&mut self) -> Result<Option<RgbImage>> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| anyhow!("video file source not connected; call connect() first"))?;
        if let Some(image) = decoder.next_image()? {
            return Ok(Some(image));
        }
        if !self.loop_files {
            return Ok(None);
        }
        log::info!("VideoFileSource: {} ended, restarting", self.path.display());
        let mut reopened = VideoDecoder::open(&self.path)?;
        let image = reopened.next_image()?;
        self.decoder = Some(reopened);
        Ok(image)
    }
}

impl VideoDecoder {
    fn open(path: &Path) -> Result<Self> {
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("open video file {} with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", path.display()))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
        })
    }

    /// Next decoded picture, draining the decoder at end of file.
    fn next_image(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb)
                    .context("scale frame to RGB")?;
                return frame_to_image(&rgb).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }
}

impl FrameSource for VideoFileSource {
    fn connect(&mut self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let decoder = VideoDecoder::open(&self.path).map_err(|err| {
            self.last_error = Some(format!("{:#}", err));
            err
        })?;
        log::info!(
            "VideoFileSource: connected to {} ({}x{})",
            self.path.display(),
            decoder.decoder.width(),
            decoder.decoder.height()
        );
        self.decoder = Some(decoder);
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let image = match self.decode_next() {
            Ok(Some(image)) => image,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.last_error = Some(format!("{:#}", err));
                return Err(err);
            }
        };
        self.pace();
        self.frame_count += 1;
        Ok(Some(Frame::from_rgb_image(
            self.frame_count,
            crate::now_s(),
            image,
        )))
    }

    fn release(&mut self) -> Result<()> {
        self.decoder = None;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.decoder.is_none() {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= health_grace(self.target_fps),
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.display().to_string(),
        }
    }
}

/// Copy an RGB24 picture out of FFmpeg's padded rows.
fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("ffmpeg frame does not match {}x{}", width, height))
}
