//! Hosted inference backend speaking the Roboflow detect API.
//!
//! Request: `POST {api_url}/{model_id}?api_key=…&confidence=…` with the frame as
//! a base64 JPEG body. Response: `{"predictions": [{x, y, width, height,
//! confidence, class}, …]}` in center format, or `{"error": …}`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Deserialize;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::Prediction;
use crate::frame::{encode_jpeg, Frame};
use crate::transport::{describe_http_error, http_agent};

pub const DEFAULT_API_URL: &str = "https://detect.roboflow.com";
pub const DEFAULT_MODEL_ID: &str = "crowd-counting-dataset-w3o7w/2";

/// Configuration for the hosted backend.
#[derive(Clone, Debug)]
pub struct RoboflowConfig {
    pub api_url: String,
    pub model_id: String,
    /// Opaque credential, supplied externally.
    pub api_key: String,
    /// Minimum confidence in percent, applied server side.
    pub confidence_pct: u8,
    /// JPEG quality of the uploaded frame.
    pub jpeg_quality: u8,
    pub timeout: Option<Duration>,
}

impl Default for RoboflowConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            api_key: String::new(),
            confidence_pct: 15,
            jpeg_quality: 85,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

pub struct RoboflowBackend {
    config: RoboflowConfig,
    endpoint: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct RoboflowResponse {
    #[serde(default)]
    predictions: Option<Vec<Prediction>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl RoboflowBackend {
    pub fn new(config: RoboflowConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(anyhow!("roboflow backend requires an api key"));
        }
        if config.model_id.trim().is_empty() {
            return Err(anyhow!("roboflow backend requires a model id"));
        }
        let base = url::Url::parse(&config.api_url)
            .with_context(|| format!("parse inference api url {}", config.api_url))?;
        let endpoint = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            config.model_id.trim_matches('/')
        );
        let agent = http_agent("person inference", config.timeout);
        Ok(Self {
            config,
            endpoint,
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl InferenceBackend for RoboflowBackend {
    fn name(&self) -> &'static str {
        "roboflow"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Prediction>> {
        let jpeg = encode_jpeg(frame, self.config.jpeg_quality)?;
        let body = base64::engine::general_purpose::STANDARD.encode(jpeg);

        let response = self
            .agent
            .post(&self.endpoint)
            .query("api_key", &self.config.api_key)
            .query("confidence", &self.config.confidence_pct.to_string())
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body)
            .map_err(|e| anyhow!("inference request failed: {}", describe_http_error(e)))?;

        let text = response
            .into_string()
            .context("read inference response body")?;
        parse_response(&text)
    }
}

/// Parse a detect API response body.
pub fn parse_response(body: &str) -> Result<Vec<Prediction>> {
    let parsed: RoboflowResponse =
        serde_json::from_str(body).context("inference response is not valid json")?;
    if let Some(error) = parsed.error {
        return Err(anyhow!("inference service error: {}", error));
    }
    Ok(parsed.predictions.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_predictions() {
        let body = r#"{
            "time": 0.12,
            "image": {"width": 640, "height": 480},
            "predictions": [
                {"x": 100.5, "y": 80, "width": 40, "height": 90, "confidence": 0.81, "class": "person", "class_id": 0},
                {"x": 300, "y": 200, "width": 35, "height": 70, "confidence": 0.42, "class": "person"}
            ]
        }"#;
        let predictions = parse_response(body).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].x, Some(100.5));
        assert_eq!(predictions[0].class.as_deref(), Some("person"));
        assert_eq!(predictions[1].confidence, Some(0.42));
    }

    #[test]
    fn missing_prediction_list_is_empty() {
        assert!(parse_response(r#"{"image": {}}"#).unwrap().is_empty());
    }

    #[test]
    fn partial_prediction_survives_parsing() {
        let predictions = parse_response(r#"{"predictions": [{"x": 1, "y": 2}]}"#).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].width, None);
    }

    #[test]
    fn error_body_is_rejected() {
        let err = parse_response(r#"{"error": "Model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("Model not found"));
    }

    #[test]
    fn requires_api_key() {
        assert!(RoboflowBackend::new(RoboflowConfig::default()).is_err());
    }

    #[test]
    fn endpoint_joins_model_id() {
        let backend = RoboflowBackend::new(RoboflowConfig {
            api_key: "k".into(),
            ..RoboflowConfig::default()
        })
        .unwrap();
        assert_eq!(
            backend.endpoint(),
            "https://detect.roboflow.com/crowd-counting-dataset-w3o7w/2"
        );
    }
}
