//! Inference backends.

pub mod roboflow;
pub mod stub;

use anyhow::Result;

use crate::config::{InferenceBackendKind, InferenceSettings};
use crate::detect::backend::InferenceBackend;

pub use roboflow::{RoboflowBackend, RoboflowConfig};
pub use stub::StubBackend;

/// Build the configured inference backend.
pub fn backend_from_settings(settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    let backend: Box<dyn InferenceBackend> = match settings.backend {
        InferenceBackendKind::Stub => {
            log::warn!("inference backend is the stub: person counts are always 0");
            Box::new(StubBackend::new())
        }
        InferenceBackendKind::Roboflow => {
            let backend = RoboflowBackend::new(settings.roboflow.clone())?;
            log::info!("inference backend: roboflow at {}", backend.endpoint());
            Box::new(backend)
        }
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_configured_backend() -> Result<()> {
        let mut settings = InferenceSettings {
            backend: InferenceBackendKind::Stub,
            roboflow: RoboflowConfig::default(),
        };
        assert_eq!(backend_from_settings(&settings)?.name(), "stub");

        settings.backend = InferenceBackendKind::Roboflow;
        assert!(backend_from_settings(&settings).is_err());
        settings.roboflow.api_key = "key".into();
        assert_eq!(backend_from_settings(&settings)?.name(), "roboflow");
        Ok(())
    }
}
