use anyhow::Result;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::Prediction;
use crate::frame::Frame;

/// Stub backend for testing and dry runs. Returns the same predictions for every frame.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    predictions: Vec<Prediction>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predictions(predictions: Vec<Prediction>) -> Self {
        Self {
            predictions,
            calls: 0,
        }
    }

    /// Number of inference calls served.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Prediction>> {
        self.calls += 1;
        Ok(self.predictions.clone())
    }
}
