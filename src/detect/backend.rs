use anyhow::Result;

use crate::detect::result::Prediction;
use crate::frame::Frame;

/// Person-detection inference capability.
///
/// Implementations wrap an external model (hosted or local) and return its raw
/// center-format output. Translation into boxes, and the decision of what a
/// failure means for the cycle, belong to [`crate::detect::PersonDetector`].
///
/// A call may block; implementations that talk to the network must honour a
/// configured timeout.
pub trait InferenceBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a frame.
    ///
    /// Implementations must treat the frame as read-only.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Prediction>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Prediction>> {
        (**self).infer(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
