//! Pipeline driver.
//!
//! Owns the loop and every stage. One frame is read, processed to completion
//! (including the blocking inference and publish calls) and dropped before the
//! next one is read, so nothing here needs locking. The only cross-thread
//! state is the stop flag, checked once per iteration.
//!
//! State machine:
//!
//! ```text
//! INIT --connect ok--> RUNNING --end of stream / stop--> STOPPING --> STOPPED
//!   |                     |
//!   +--connect failed--> FAILED <--source read failed (after STOPPING)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::bright_spot::{DEFAULT_BRIGHT_THRESHOLD, DEFAULT_MIN_AREA};
use crate::detect::{BrightSpotDetector, Detection, FlashlightRegion, InferenceBackend, PersonDetector};
use crate::error::PipelineError;
use crate::frame::{encode_jpeg, Frame};
use crate::ingest::FrameSource;
use crate::preview::{annotate, PreviewSink};
use crate::publish::{ObjectStore, RecordStore, RemotePublisher};
use crate::schedule::{FrameAction, FrameScheduler, DEFAULT_SKIP_INTERVAL};
use crate::status::{MetricsSnapshot, StatusAggregator, DEFAULT_PERSON_THRESHOLD};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source has no more frames.
    StreamEnded,
    /// `StopHandle::request_stop` was called.
    StopRequested,
    /// The configured frame limit was reached.
    FrameLimit,
    /// Reading from the source failed.
    SourceFailed,
}

/// Cloneable stop signal, observed at the top of each loop iteration.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub skip_interval: u32,
    pub person_threshold: u32,
    pub bright_threshold: u8,
    pub min_area: f32,
    /// Quality of the published snapshot.
    pub jpeg_quality: u8,
    /// Stop after reading this many frames.
    pub max_frames: Option<u64>,
    pub health_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            skip_interval: DEFAULT_SKIP_INTERVAL,
            person_threshold: DEFAULT_PERSON_THRESHOLD,
            bright_threshold: DEFAULT_BRIGHT_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            jpeg_quality: 85,
            max_frames: None,
            health_interval: Duration::from_secs(5),
        }
    }
}

/// Counters over one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub frames_read: u64,
    pub frames_skipped: u64,
    /// PROCESS decisions.
    pub cycles: u64,
    pub publishes: u64,
    pub publish_failures: u64,
    pub detection_failures: u64,
    /// Cycles skipped because inference failed before anything was published.
    pub cycles_without_metrics: u64,
    pub unreadable_frames: u64,
    pub dropped_detections: u64,
    pub person_count_min: Option<u32>,
    pub person_count_max: Option<u32>,
    person_count_sum: u64,
    person_count_samples: u64,
}

impl PipelineStats {
    fn record_person_count(&mut self, count: u32) {
        self.person_count_min = Some(self.person_count_min.map_or(count, |m| m.min(count)));
        self.person_count_max = Some(self.person_count_max.map_or(count, |m| m.max(count)));
        self.person_count_sum += count as u64;
        self.person_count_samples += 1;
    }

    /// Mean person count over cycles where inference succeeded.
    pub fn person_count_mean(&self) -> Option<f64> {
        (self.person_count_samples > 0)
            .then(|| self.person_count_sum as f64 / self.person_count_samples as f64)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub state: PipelineState,
    pub reason: StopReason,
    pub stats: PipelineStats,
    pub person_count_mean: Option<f64>,
    pub last_known: Option<MetricsSnapshot>,
}

pub struct Pipeline<S, B, O, R> {
    source: S,
    scheduler: FrameScheduler,
    bright_spots: BrightSpotDetector,
    persons: PersonDetector<B>,
    aggregator: StatusAggregator,
    publisher: RemotePublisher<O, R>,
    preview: Option<Box<dyn PreviewSink>>,
    settings: PipelineSettings,
    state: PipelineState,
    stop: StopHandle,
    /// Metrics of the last successful publish.
    last_known: Option<MetricsSnapshot>,
    /// Boxes of the last processed cycle, painted on skipped frames.
    overlay: (Vec<Detection>, Vec<FlashlightRegion>),
    stats: PipelineStats,
    last_health_log: Instant,
}

impl<S, B, O, R> Pipeline<S, B, O, R>
where
    S: FrameSource,
    B: InferenceBackend,
    O: ObjectStore,
    R: RecordStore,
{
    pub fn new(
        source: S,
        backend: B,
        publisher: RemotePublisher<O, R>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        if !settings.min_area.is_finite() || settings.min_area < 0.0 {
            return Err(anyhow!("min_area must be >= 0, got {}", settings.min_area));
        }
        Ok(Self {
            source,
            scheduler: FrameScheduler::new(settings.skip_interval)?,
            bright_spots: BrightSpotDetector::new(settings.bright_threshold, settings.min_area),
            persons: PersonDetector::new(backend),
            aggregator: StatusAggregator::new(settings.person_threshold),
            publisher,
            preview: None,
            settings,
            state: PipelineState::Init,
            stop: StopHandle::default(),
            last_known: None,
            overlay: (Vec::new(), Vec::new()),
            stats: PipelineStats::default(),
            last_health_log: Instant::now(),
        })
    }

    pub fn with_preview(mut self, preview: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Use an existing stop signal instead of a fresh one.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn last_known(&self) -> Option<&MetricsSnapshot> {
        self.last_known.as_ref()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn publisher(&self) -> &RemotePublisher<O, R> {
        &self.publisher
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Drive the loop until the stream ends, a stop is requested or the
    /// source fails. Can only be called once.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state != PipelineState::Init {
            return Err(anyhow!("pipeline already ran (state {:?})", self.state));
        }

        if let Err(err) = self.source.connect() {
            log::error!("frame source unavailable: {:#}", err);
            self.transition(PipelineState::Failed);
            return Err(err.context("acquire frame source"));
        }
        if let Err(err) = self.persons.backend_mut().warm_up() {
            log::warn!("inference backend warm-up failed: {:#}", err);
        }
        self.transition(PipelineState::Running);
        self.last_health_log = Instant::now();

        let mut failure = None;
        let reason = loop {
            if self.stop.is_stop_requested() {
                break StopReason::StopRequested;
            }
            if let Some(max) = self.settings.max_frames {
                if self.stats.frames_read >= max {
                    break StopReason::FrameLimit;
                }
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::StreamEnded,
                Err(err) => {
                    log::error!("frame source read failed: {:#}", err);
                    failure = Some(err);
                    break StopReason::SourceFailed;
                }
            };
            self.stats.frames_read += 1;

            match self.scheduler.next_action(frame.index) {
                FrameAction::Process => self.process(&frame),
                FrameAction::Skip => self.stats.frames_skipped += 1,
            }
            self.render_preview(&frame);
            self.log_health_if_due();
        };

        log::info!("pipeline stopping: {:?}", reason);
        self.transition(PipelineState::Stopping);
        self.release();

        if let Some(err) = failure {
            self.transition(PipelineState::Failed);
            return Err(err.context("frame source failed"));
        }
        self.transition(PipelineState::Stopped);

        Ok(RunSummary {
            state: self.state,
            reason,
            stats: self.stats.clone(),
            person_count_mean: self.stats.person_count_mean(),
            last_known: self.last_known.clone(),
        })
    }

    /// One detection cycle: detect, aggregate, annotate, publish.
    fn process(&mut self, frame: &Frame) {
        self.stats.cycles += 1;

        let lights = match self.bright_spots.detect(frame) {
            Ok(lights) => lights,
            Err(err) => {
                log::error!(
                    "frame {}: bright-spot stage failed, counting 0 flashlights: {}",
                    frame.index,
                    err
                );
                self.stats.unreadable_frames += 1;
                Vec::new()
            }
        };

        let people = match self.persons.infer(frame) {
            Ok(found) => {
                self.stats.dropped_detections += found.dropped as u64;
                self.stats.record_person_count(found.count());
                Ok(found.detections)
            }
            Err(err) => {
                self.stats.detection_failures += 1;
                log::warn!("frame {}: {}", frame.index, err);
                Err(err)
            }
        };

        let person_count = match &people {
            Ok(people) => people.len() as u32,
            Err(err) => match self
                .last_known
                .as_ref()
                .filter(|_| err.falls_back_to_last_known())
            {
                Some(previous) => {
                    log::info!(
                        "frame {}: reusing last known person count {}",
                        frame.index,
                        previous.person_count
                    );
                    previous.person_count
                }
                None => {
                    if lights.is_empty() {
                        log::warn!(
                            "frame {}: no person count available yet, skipping publish",
                            frame.index
                        );
                    } else {
                        log::warn!(
                            "frame {}: no person count available yet, skipping publish; {} flashlight(s) not reported",
                            frame.index,
                            lights.len()
                        );
                    }
                    self.stats.cycles_without_metrics += 1;
                    self.overlay.1 = lights;
                    return;
                }
            },
        };

        let snapshot =
            self.aggregator
                .aggregate(person_count, lights.len() as u32, crate::now_s());
        let people = match people {
            Ok(people) => people,
            Err(_) => std::mem::take(&mut self.overlay.0),
        };
        let annotated = annotate(frame, &people, &lights, &snapshot);
        self.overlay = (people, lights);

        let published = encode_jpeg(&annotated, self.settings.jpeg_quality)
            .map_err(|e| PipelineError::publish_failed(format!("encode snapshot: {:#}", e)))
            .and_then(|jpeg| self.publisher.publish(&jpeg, &snapshot));
        match published {
            Ok(url) => {
                self.stats.publishes += 1;
                log::info!(
                    "frame {}: published persons={} flashlights={} status={} url={}",
                    frame.index,
                    snapshot.person_count,
                    snapshot.flashlight_count,
                    snapshot.status,
                    url
                );
                self.last_known = Some(snapshot);
            }
            Err(err) => {
                self.stats.publish_failures += 1;
                if err.falls_back_to_last_known() {
                    log::warn!(
                        "frame {}: {}; dashboard keeps the previous snapshot",
                        frame.index,
                        err
                    );
                } else {
                    log::error!("frame {}: {}", frame.index, err);
                }
            }
        }
    }

    fn render_preview(&mut self, frame: &Frame) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        let result = match &self.last_known {
            Some(metrics) => {
                let painted = annotate(frame, &self.overlay.0, &self.overlay.1, metrics);
                preview.render(&painted)
            }
            None => preview.render(frame),
        };
        if let Err(err) = result {
            log::warn!("preview render failed: {:#}", err);
        }
    }

    fn release(&mut self) {
        if let Err(err) = self.source.release() {
            log::error!("frame source release failed: {:#}", err);
        } else {
            log::info!("frame source released");
        }
        if let Some(mut preview) = self.preview.take() {
            if let Err(err) = preview.close() {
                log::warn!("preview close failed: {:#}", err);
            }
        }
    }

    fn log_health_if_due(&mut self) {
        if self.last_health_log.elapsed() < self.settings.health_interval {
            return;
        }
        let source = self.source.stats();
        log::info!(
            "source health={} frames={} source={} cycles={} publishes={} publish_failures={} detection_failures={}",
            self.source.is_healthy(),
            source.frames_captured,
            source.source,
            self.stats.cycles,
            self.stats.publishes,
            self.stats.publish_failures,
            self.stats.detection_failures
        );
        self.last_health_log = Instant::now();
    }

    fn transition(&mut self, next: PipelineState) {
        log::info!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
