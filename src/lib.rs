//! Crowd Sentinel
//!
//! Watches a live camera feed at a crowd event, counts people through an
//! external detection model, spots bright handheld lights (phone flashlights,
//! lighters) with a local image-processing pass, derives a SAFE/DANGER status
//! and publishes the latest annotated frame plus metrics to a dashboard store.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> FrameScheduler -> { BrightSpotDetector, PersonDetector }
//!             -> StatusAggregator -> RemotePublisher
//! ```
//!
//! The loop is single threaded and strictly sequential: one frame is read,
//! processed to completion (including blocking external calls) and dropped
//! before the next is read. External collaborators sit behind capability
//! traits so the whole pipeline runs against in-memory fakes in tests:
//!
//! - [`ingest::FrameSource`]: where frames come from
//! - [`detect::InferenceBackend`]: the person-detection model
//! - [`publish::ObjectStore`] / [`publish::RecordStore`]: the dashboard store
//!
//! # Module Structure
//!
//! - `frame`: Frame and snapshot encoding
//! - `ingest`: Frame sources (synthetic, replay, image directory, HTTP MJPEG)
//! - `schedule`: Frame-skip scheduling
//! - `detect`: Bright-spot detector, person detector adapter, inference backends
//! - `status`: Status rule and metrics snapshot
//! - `publish`: Remote publisher and stores
//! - `preview`: Annotation and local preview
//! - `pipeline`: The driver loop and its state machine
//! - `config`: File + environment configuration

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preview;
pub mod publish;
pub mod schedule;
pub mod status;
pub mod transport;

pub use config::SentinelConfig;
pub use detect::{
    BoundingBox, BrightSpotDetector, Detection, FlashlightRegion, InferenceBackend,
    PersonDetector, Prediction,
};
pub use error::PipelineError;
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceSettings};
pub use pipeline::{Pipeline, PipelineSettings, PipelineState, RunSummary, StopHandle, StopReason};
pub use publish::{MetricsRecord, ObjectStore, RecordStore, RemotePublisher};
pub use schedule::{FrameAction, FrameScheduler};
pub use status::{MetricsSnapshot, SafetyStatus, StatusAggregator};

/// Current wall-clock time in whole seconds since the Unix epoch.
///
/// A clock set before 1970 reads as 0.
pub fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
