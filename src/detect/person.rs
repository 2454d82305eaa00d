//! Person detector adapter.
//!
//! Translates the inference service's center-format predictions into
//! top-left boxes and maps service failures onto `DetectionUnavailable`.
//! Deciding what an outage means for the cycle is left to the caller.

use crate::detect::backend::InferenceBackend;
use crate::detect::result::{BoundingBox, Detection, Prediction};
use crate::error::PipelineError;
use crate::frame::Frame;

const DEFAULT_LABEL: &str = "person";

/// Result of one inference call after translation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersonDetections {
    pub detections: Vec<Detection>,
    /// Predictions dropped for missing or non-finite geometry.
    pub dropped: usize,
}

impl PersonDetections {
    pub fn count(&self) -> u32 {
        self.detections.len() as u32
    }
}

pub struct PersonDetector<B> {
    backend: B,
}

impl<B: InferenceBackend> PersonDetector<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Run the external model on `frame`.
    ///
    /// Malformed predictions are dropped one by one; only a failed call fails
    /// the whole result.
    pub fn infer(&mut self, frame: &Frame) -> Result<PersonDetections, PipelineError> {
        let predictions = self.backend.infer(frame).map_err(|e| {
            PipelineError::detection_unavailable(format!("{} backend: {:#}", self.backend.name(), e))
        })?;

        let mut out = PersonDetections {
            detections: Vec::with_capacity(predictions.len()),
            dropped: 0,
        };
        for (i, prediction) in predictions.iter().enumerate() {
            match to_detection(prediction) {
                Ok(detection) => out.detections.push(detection),
                Err(err) => {
                    out.dropped += 1;
                    log::warn!("frame {}: dropping prediction #{}: {}", frame.index, i, err);
                }
            }
        }
        Ok(out)
    }
}

/// Convert one center-format prediction into a top-left box.
///
/// `x_min = cx - w/2`, `x_max = cx + w/2` (same for y), truncated toward zero
/// to pixel coordinates; width/height never go below zero.
pub fn to_detection(prediction: &Prediction) -> Result<Detection, PipelineError> {
    let cx = require(prediction.x, "x")?;
    let cy = require(prediction.y, "y")?;
    let w = require(prediction.width, "width")?;
    let h = require(prediction.height, "height")?;

    let x_min = (cx - w / 2.0) as i32;
    let y_min = (cy - h / 2.0) as i32;
    let x_max = (cx + w / 2.0) as i32;
    let y_max = (cy + h / 2.0) as i32;

    let bbox = BoundingBox::new(
        x_min,
        y_min,
        (x_max as i64 - x_min as i64).max(0) as u32,
        (y_max as i64 - y_min as i64).max(0) as u32,
    );

    let confidence = prediction
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0));

    let label = prediction
        .class
        .as_deref()
        .filter(|label| !label.trim().is_empty())
        .unwrap_or(DEFAULT_LABEL)
        .to_string();

    Ok(Detection {
        bbox,
        confidence,
        label,
    })
}

fn require(value: Option<f32>, field: &str) -> Result<f32, PipelineError> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(PipelineError::MalformedDetection(format!(
            "field '{}' is not finite ({})",
            field, v
        ))),
        None => Err(PipelineError::MalformedDetection(format!(
            "missing field '{}'",
            field
        ))),
    }
}
