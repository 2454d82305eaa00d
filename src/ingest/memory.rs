use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Replays a fixed list of frames, then ends the stream.
///
/// Frames keep the index they were built with.
pub struct ReplaySource {
    name: String,
    frames: VecDeque<Frame>,
    connected: bool,
    frames_captured: u64,
}

impl ReplaySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self::named("replay://memory", frames)
    }

    pub fn named(name: &str, frames: Vec<Frame>) -> Self {
        Self {
            name: name.to_string(),
            frames: frames.into(),
            connected: false,
            frames_captured: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl FrameSource for ReplaySource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.name));
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) -> Result<()> {
        self.connected = false;
        self.frames.clear();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            source: self.name.clone(),
        }
    }
}
