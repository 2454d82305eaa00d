//! Frame-skip scheduling.
//!
//! Bounds the rate of inference and publish I/O independently of the camera
//! frame rate: exactly one frame in every `skip_interval` consecutive frames is
//! processed. The counter starts at zero, so the first PROCESS lands on the
//! `skip_interval`-th frame (frame index `N` with 1-based source numbering).

use anyhow::{anyhow, Result};

pub const DEFAULT_SKIP_INTERVAL: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameAction {
    /// Pass the frame through untouched.
    Skip,
    /// Run detection, aggregation and publish on the frame.
    Process,
}

#[derive(Clone, Debug)]
pub struct FrameScheduler {
    skip_interval: u32,
    counter: u32,
}

impl FrameScheduler {
    pub fn new(skip_interval: u32) -> Result<Self> {
        if skip_interval == 0 {
            return Err(anyhow!("skip_interval must be >= 1"));
        }
        Ok(Self {
            skip_interval,
            counter: 0,
        })
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    /// Decide what to do with the next frame.
    ///
    /// `frame_index` is only used for tracing; the decision depends solely on
    /// how many frames were seen since the last PROCESS.
    pub fn next_action(&mut self, frame_index: u64) -> FrameAction {
        self.counter += 1;
        if self.counter >= self.skip_interval {
            self.counter = 0;
            log::trace!("scheduler: frame {} -> process", frame_index);
            FrameAction::Process
        } else {
            log::trace!(
                "scheduler: frame {} -> skip ({}/{})",
                frame_index,
                self.counter,
                self.skip_interval
            );
            FrameAction::Skip
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self {
            skip_interval: DEFAULT_SKIP_INTERVAL,
            counter: 0,
        }
    }
}
