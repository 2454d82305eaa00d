//! Per-cycle failure taxonomy.
//!
//! These are the failures the pipeline recovers from locally. Plumbing errors
//! (I/O, decoding, configuration) stay `anyhow::Error` and are wrapped into one
//! of these variants at the component boundary.
//!
//! End of stream is not an error: sources return `Ok(None)` and the driver
//! records [`crate::pipeline::StopReason::StreamEnded`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The external person-detection call failed or timed out.
    #[error("person detection unavailable: {0}")]
    DetectionUnavailable(String),

    /// The object upload or the record write failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// A single detection was missing required geometry.
    #[error("malformed detection: {0}")]
    MalformedDetection(String),

    /// Frame pixels could not be interpreted (size mismatch, overflow).
    #[error("unreadable frame: {0}")]
    UnreadableFrame(String),
}

impl PipelineError {
    pub fn detection_unavailable(err: impl std::fmt::Display) -> Self {
        Self::DetectionUnavailable(err.to_string())
    }

    pub fn publish_failed(err: impl std::fmt::Display) -> Self {
        Self::PublishFailed(err.to_string())
    }

    /// True for failures the driver answers by reusing the last published metrics.
    pub fn falls_back_to_last_known(&self) -> bool {
        matches!(
            self,
            PipelineError::DetectionUnavailable(_) | PipelineError::PublishFailed(_)
        )
    }
}
