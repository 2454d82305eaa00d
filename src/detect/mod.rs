mod backend;
pub mod backends;
pub mod bright_spot;
pub mod person;
mod result;

pub use backend::InferenceBackend;
pub use backends::{backend_from_settings, RoboflowBackend, RoboflowConfig, StubBackend};
pub use bright_spot::BrightSpotDetector;
pub use person::{PersonDetections, PersonDetector};
pub use result::{BoundingBox, Detection, FlashlightRegion, Prediction};
