//! HTTP camera source.
//!
//! Handles the two shapes cheap IP / ESP32 cameras serve:
//! - `multipart/x-mixed-replace` MJPEG: one long response, frames delimited by
//!   part boundaries. Frames are cut out by scanning for the JPEG SOI (`FF D8`)
//!   and EOI (`FF D9`) markers, so the boundary string itself is never parsed.
//! - Plain `image/jpeg` snapshot endpoint: re-fetched once per frame.
//!
//! The end of an MJPEG response is end-of-stream.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use super::{frame_interval, health_grace, FrameSource, SourceSettings, SourceStats};
use crate::frame::{decode_image, Frame};
use crate::transport::{describe_http_error, stream_agent};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct MjpegSource {
    settings: SourceSettings,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let url = url::Url::parse(&settings.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = stream_agent("camera stream", settings.timeout);
        Ok(Self {
            settings,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.settings.url).map(Some),
        }
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.settings.url)
            .call()
            .map_err(|e| anyhow!("connect to {}: {}", self.settings.url, describe_http_error(e)))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        log::info!(
            "MjpegSource: connected to {} ({})",
            self.settings.url,
            if content_type.contains("multipart") {
                "mjpeg"
            } else {
                "snapshot"
            }
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let min_interval = frame_interval(self.settings.target_fps);
        loop {
            let jpeg = match self.read_jpeg() {
                Ok(Some(jpeg)) => jpeg,
                Ok(None) => return Ok(None),
                Err(err) => {
                    self.last_error = Some(format!("{:#}", err));
                    return Err(err);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    if matches!(self.stream, Some(HttpStream::SingleJpeg)) {
                        std::thread::sleep(min_interval - now.duration_since(last));
                    } else {
                        continue;
                    }
                }
            }

            let image = match decode_image(&jpeg) {
                Ok(image) => image,
                Err(err) => {
                    log::warn!("MjpegSource: skipping undecodable frame: {:#}", err);
                    continue;
                }
            };
            self.frame_count += 1;
            self.last_frame_at = Some(Instant::now());
            self.last_error = None;
            return Ok(Some(Frame::from_rgb_image(
                self.frame_count,
                crate::now_s(),
                image,
            )));
        }
    }

    fn release(&mut self) -> Result<()> {
        self.stream = None;
        log::info!("MjpegSource: released {}", self.settings.url);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.settings.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` when the response body ends.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| anyhow!("fetch jpeg snapshot from {}: {}", url, describe_http_error(e)))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Byte range `[start, end)` of the first complete JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_jpeg;
    use std::io::Cursor;

    fn multipart(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for jpeg in frames {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
            body.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
            body.extend_from_slice(jpeg);
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    #[test]
    fn finds_jpeg_markers() {
        let buffer = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x03];
        assert_eq!(find_jpeg_bounds(&buffer), Some((1, 7)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00]), None);
        assert_eq!(find_jpeg_bounds(&[0x00, 0x01]), None);
    }

    #[test]
    fn splits_multipart_body_into_frames() -> Result<()> {
        let a = encode_jpeg(&Frame::filled(1, 16, 8, [250, 250, 250]), 90)?;
        let b = encode_jpeg(&Frame::filled(2, 16, 8, [5, 5, 5]), 90)?;
        let body = multipart(&[a.clone(), b.clone()]);
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));

        assert_eq!(stream.read_next_jpeg()?, Some(a));
        assert_eq!(stream.read_next_jpeg()?, Some(b));
        assert_eq!(stream.read_next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        let settings = SourceSettings {
            url: "udp://0.0.0.0:5000".to_string(),
            ..SourceSettings::default()
        };
        assert!(MjpegSource::new(settings).is_err());
    }

    #[test]
    fn unconnected_source_is_unhealthy() -> Result<()> {
        let source = MjpegSource::new(SourceSettings {
            url: "http://127.0.0.1:81/stream".to_string(),
            ..SourceSettings::default()
        })?;
        assert!(!source.is_healthy());
        assert_eq!(source.stats().frames_captured, 0);
        Ok(())
    }
}
