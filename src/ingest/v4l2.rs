//! Local camera source over V4L2 (USB webcams, CSI cameras).
//!
//! The device is asked for packed RGB (`RGB3`) first and motion JPEG (`MJPG`)
//! second; cameras offering neither are refused at `connect`. Undecodable
//! MJPEG buffers are skipped with a warning.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::{health_grace, FrameSource, SourceSettings, SourceStats};
use crate::frame::{decode_image, Frame, CHANNELS};

/// Consecutive undecodable buffers tolerated before the read fails.
const MAX_BAD_BUFFERS: u32 = 5;
const CAPTURE_BUFFERS: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb,
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> v4l::FourCC {
        match self {
            PixelFormat::Rgb => v4l::FourCC::new(b"RGB3"),
            PixelFormat::Mjpeg => v4l::FourCC::new(b"MJPG"),
        }
    }

    fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    device: String,
    target_fps: u32,
    width: u32,
    height: u32,
    state: Option<CaptureState>,
    format: Option<PixelFormat>,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl V4l2Source {
    pub fn new(device: impl Into<String>, settings: &SourceSettings) -> Self {
        Self {
            device: device.into(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            state: None,
            format: None,
            active_width: settings.width,
            active_height: settings.height,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn negotiate(&mut self, device: &mut v4l::Device) -> Result<PixelFormat> {
        use v4l::video::Capture;

        for wanted in [PixelFormat::Rgb, PixelFormat::Mjpeg] {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.width;
            format.height = self.height;
            format.fourcc = wanted.fourcc();
            let granted = match device.set_format(&format) {
                Ok(granted) => granted,
                Err(err) => {
                    log::warn!("V4l2Source: {} refused {:?}: {}", self.device, wanted, err);
                    continue;
                }
            };
            if let Some(format) = PixelFormat::from_fourcc(&granted.fourcc.repr) {
                self.active_width = granted.width;
                self.active_height = granted.height;
                return Ok(format);
            }
        }
        let current = device.format().context("read v4l2 format")?;
        Err(anyhow!("{} offers {}, need RGB3 or MJPG", self.device, current.fourcc))
    }

    fn to_image(&self, format: PixelFormat, bytes: &[u8]) -> Result<RgbImage> {
        match format {
            PixelFormat::Rgb => {
                let len = self.active_width as usize * self.active_height as usize * CHANNELS;
                let pixels = bytes.get(..len).ok_or_else(|| {
                    anyhow!("short RGB3 buffer: {} < {} bytes", bytes.len(), len)
                })?;
                RgbImage::from_raw(self.active_width, self.active_height, pixels.to_vec())
                    .ok_or_else(|| anyhow!("RGB3 buffer does not match frame size"))
            }
            PixelFormat::Mjpeg => decode_image(bytes),
        }
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let format = self.negotiate(&mut device)?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", self.device, err);
            }
        }

        let state = CaptureStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(format!("{:#}", err));
            err
        })?;

        self.state = Some(state);
        self.format = Some(format);
        self.last_error = None;
        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.device,
            self.active_width,
            self.active_height,
            format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let format = self
            .format
            .ok_or_else(|| anyhow!("v4l2 device not connected; call connect() first"))?;

        let mut bad_buffers = 0;
        loop {
            let state = self
                .state
                .as_mut()
                .ok_or_else(|| anyhow!("v4l2 device not connected; call connect() first"))?;
            let captured = state.with_mut(|fields| {
                fields.stream.next().map(|(buf, meta)| {
                    let used = meta.bytesused as usize;
                    let end = if used == 0 || used > buf.len() {
                        buf.len()
                    } else {
                        used
                    };
                    buf[..end].to_vec()
                })
            });
            let bytes = match captured {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.last_error = Some(err.to_string());
                    return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
                }
            };

            match self.to_image(format, &bytes) {
                Ok(image) => {
                    self.frame_count += 1;
                    self.last_frame_at = Some(Instant::now());
                    return Ok(Some(Frame::from_rgb_image(
                        self.frame_count,
                        crate::now_s(),
                        image,
                    )));
                }
                Err(err) => {
                    bad_buffers += 1;
                    log::warn!("V4l2Source: skipping buffer from {}: {:#}", self.device, err);
                    if bad_buffers >= MAX_BAD_BUFFERS {
                        self.last_error = Some(format!("{:#}", err));
                        return Err(err.context(format!(
                            "{} undecodable buffers in a row from {}",
                            bad_buffers, self.device
                        )));
                    }
                }
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        self.state = None;
        self.format = None;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
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
            source: self.device.clone(),
        }
    }
}
