use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::backends::roboflow::{DEFAULT_API_URL, DEFAULT_MODEL_ID};
use crate::detect::RoboflowConfig;
use crate::ingest::SourceSettings;
use crate::pipeline::PipelineSettings;
use crate::publish::firebase::{DEFAULT_PUBLIC_BASE, DEFAULT_STORAGE_API};
use crate::publish::{
    FirebaseConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_OBJECT_NAME, DEFAULT_RECORD_KEY,
};
use crate::transport::timeout_from_secs;

const DEFAULT_SOURCE_URL: &str = "stub://crowd";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_CONFIDENCE_PCT: u8 = 15;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUBLISH_DIR: &str = "sentinel_out";
const DEFAULT_PREVIEW_INTERVAL_MS: u64 = 500;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    inference: Option<InferenceConfigFile>,
    publish: Option<PublishConfigFile>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    frame_limit: Option<u64>,
    loop_files: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    skip_interval: Option<u32>,
    person_threshold: Option<u32>,
    bright_threshold: Option<u8>,
    min_area: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    backend: Option<String>,
    api_url: Option<String>,
    model_id: Option<String>,
    confidence_pct: Option<u8>,
    jpeg_quality: Option<u8>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    backend: Option<String>,
    object_name: Option<String>,
    record_key: Option<String>,
    jpeg_quality: Option<u8>,
    dir: Option<PathBuf>,
    memory_history: Option<usize>,
    timeout_secs: Option<u64>,
    firebase: Option<FirebaseConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FirebaseConfigFile {
    bucket: Option<String>,
    database_url: Option<String>,
    storage_api: Option<String>,
    public_base: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    path: Option<PathBuf>,
    min_interval_ms: Option<u64>,
}

/// Which person-detection backend to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceBackendKind {
    /// Fixed empty prediction list (dry runs).
    Stub,
    /// Hosted Roboflow-compatible detect API.
    Roboflow,
}

impl FromStr for InferenceBackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "roboflow" => Ok(Self::Roboflow),
            other => Err(anyhow!(
                "unknown inference backend '{}'; expected stub or roboflow",
                other
            )),
        }
    }
}

/// Where snapshots and records are published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishBackendKind {
    Memory,
    Filesystem,
    Firebase,
}

impl FromStr for PublishBackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "firebase" => Ok(Self::Firebase),
            other => Err(anyhow!(
                "unknown publish backend '{}'; expected memory, filesystem or firebase",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub backend: InferenceBackendKind,
    pub roboflow: RoboflowConfig,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub backend: PublishBackendKind,
    pub object_name: String,
    pub record_key: String,
    /// Root directory of the filesystem backend.
    pub dir: PathBuf,
    /// Record writes the memory backend keeps.
    pub memory_history: usize,
    pub firebase: FirebaseConfig,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub path: PathBuf,
    pub min_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub source: SourceSettings,
    pub pipeline: PipelineSettings,
    pub inference: InferenceSettings,
    pub publish: PublishSettings,
    pub preview: Option<PreviewSettings>,
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit config file (if any), then apply environment
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            frame_limit: source_file.frame_limit,
            loop_files: source_file.loop_files.unwrap_or(false),
            timeout: timeout_from_secs(source_file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };

        let detection = file.detection.unwrap_or_default();
        let publish_file = file.publish.unwrap_or_default();
        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            skip_interval: detection.skip_interval.unwrap_or(defaults.skip_interval),
            person_threshold: detection
                .person_threshold
                .unwrap_or(defaults.person_threshold),
            bright_threshold: detection
                .bright_threshold
                .unwrap_or(defaults.bright_threshold),
            min_area: detection.min_area.unwrap_or(defaults.min_area),
            jpeg_quality: publish_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            ..defaults
        };

        let inference_file = file.inference.unwrap_or_default();
        let inference = InferenceSettings {
            backend: inference_file
                .backend
                .as_deref()
                .map(str::parse::<InferenceBackendKind>)
                .transpose()?
                .unwrap_or(InferenceBackendKind::Stub),
            roboflow: RoboflowConfig {
                api_url: inference_file
                    .api_url
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                model_id: inference_file
                    .model_id
                    .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
                api_key: String::new(),
                confidence_pct: inference_file
                    .confidence_pct
                    .unwrap_or(DEFAULT_CONFIDENCE_PCT),
                jpeg_quality: inference_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                timeout: timeout_from_secs(
                    inference_file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            },
        };

        let firebase_file = publish_file.firebase.unwrap_or_default();
        let publish = PublishSettings {
            backend: publish_file
                .backend
                .as_deref()
                .map(str::parse::<PublishBackendKind>)
                .transpose()?
                .unwrap_or(PublishBackendKind::Filesystem),
            object_name: publish_file
                .object_name
                .unwrap_or_else(|| DEFAULT_OBJECT_NAME.to_string()),
            record_key: publish_file
                .record_key
                .unwrap_or_else(|| DEFAULT_RECORD_KEY.to_string()),
            dir: publish_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLISH_DIR)),
            memory_history: publish_file
                .memory_history
                .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            firebase: FirebaseConfig {
                bucket: firebase_file.bucket.unwrap_or_default(),
                database_url: firebase_file.database_url.unwrap_or_default(),
                storage_api: firebase_file
                    .storage_api
                    .unwrap_or_else(|| DEFAULT_STORAGE_API.to_string()),
                public_base: firebase_file
                    .public_base
                    .unwrap_or_else(|| DEFAULT_PUBLIC_BASE.to_string()),
                auth_token: None,
                timeout: timeout_from_secs(
                    publish_file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            },
        };

        let preview = file.preview.and_then(|preview| {
            preview.path.map(|path| PreviewSettings {
                path,
                min_interval: Duration::from_millis(
                    preview
                        .min_interval_ms
                        .unwrap_or(DEFAULT_PREVIEW_INTERVAL_MS),
                ),
            })
        });

        Ok(Self {
            source,
            pipeline,
            inference,
            publish,
            preview,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("SENTINEL_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(skip) = env_parse("SENTINEL_SKIP_INTERVAL")? {
            self.pipeline.skip_interval = skip;
        }
        if let Some(threshold) = env_parse("SENTINEL_PERSON_THRESHOLD")? {
            self.pipeline.person_threshold = threshold;
        }
        if let Some(threshold) = env_parse("SENTINEL_BRIGHT_THRESHOLD")? {
            self.pipeline.bright_threshold = threshold;
        }
        if let Some(min_area) = env_parse("SENTINEL_MIN_AREA")? {
            self.pipeline.min_area = min_area;
        }
        if let Some(model_id) = env_string("SENTINEL_MODEL_ID") {
            self.inference.roboflow.model_id = model_id;
        }
        if let Some(backend) = env_parse("SENTINEL_INFERENCE_BACKEND")? {
            self.inference.backend = backend;
        }
        if let Some(backend) = env_parse("SENTINEL_PUBLISH_BACKEND")? {
            self.publish.backend = backend;
        }
        if let Some(path) = env_string("SENTINEL_PREVIEW_PATH") {
            let min_interval = self
                .preview
                .as_ref()
                .map(|preview| preview.min_interval)
                .unwrap_or(Duration::from_millis(DEFAULT_PREVIEW_INTERVAL_MS));
            self.preview = Some(PreviewSettings {
                path: PathBuf::from(path),
                min_interval,
            });
        }
        if let Some(key) = env_string("ROBOFLOW_API_KEY") {
            self.inference.roboflow.api_key = key;
        }
        if let Some(token) = env_string("FIREBASE_AUTH_TOKEN") {
            self.publish.firebase.auth_token = Some(token);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.url.starts_with("stub://")
            && (self.source.width == 0 || self.source.height == 0)
        {
            return Err(anyhow!("synthetic source width and height must be > 0"));
        }
        if self.pipeline.skip_interval == 0 {
            return Err(anyhow!("skip_interval must be >= 1"));
        }
        if !self.pipeline.min_area.is_finite() || self.pipeline.min_area < 0.0 {
            return Err(anyhow!("min_area must be a number >= 0"));
        }
        validate_quality("publish jpeg_quality", self.pipeline.jpeg_quality)?;
        validate_quality("inference jpeg_quality", self.inference.roboflow.jpeg_quality)?;
        if self.inference.roboflow.confidence_pct > 100 {
            return Err(anyhow!("confidence_pct must be within 0..=100"));
        }

        if self.inference.backend == InferenceBackendKind::Roboflow {
            if self.inference.roboflow.api_key.trim().is_empty() {
                return Err(anyhow!(
                    "roboflow inference requires ROBOFLOW_API_KEY to be set"
                ));
            }
            if self.inference.roboflow.model_id.trim().is_empty() {
                return Err(anyhow!("roboflow inference requires a model id"));
            }
        }

        for (what, name) in [
            ("object_name", &self.publish.object_name),
            ("record_key", &self.publish.record_key),
        ] {
            if name.trim().is_empty() {
                return Err(anyhow!("publish {} must not be empty", what));
            }
        }
        match self.publish.backend {
            PublishBackendKind::Memory => {}
            PublishBackendKind::Filesystem => {
                if self.publish.dir.as_os_str().is_empty() {
                    return Err(anyhow!("filesystem publishing requires a directory"));
                }
            }
            PublishBackendKind::Firebase => {
                if self.publish.firebase.bucket.trim().is_empty() {
                    return Err(anyhow!("firebase publishing requires a storage bucket"));
                }
                if self.publish.firebase.database_url.trim().is_empty() {
                    return Err(anyhow!("firebase publishing requires a database url"));
                }
            }
        }
        Ok(())
    }
}

fn validate_quality(what: &str, quality: u8) -> Result<()> {
    if !(1..=100).contains(&quality) {
        return Err(anyhow!("{} must be within 1..=100, got {}", what, quality));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{} is invalid ({:?}): {}", key, raw, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() -> Result<()> {
        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default())?;
        cfg.validate()?;
        assert_eq!(cfg.source.url, "stub://crowd");
        assert_eq!(cfg.pipeline.skip_interval, 3);
        assert_eq!(cfg.pipeline.bright_threshold, 220);
        assert_eq!(cfg.pipeline.min_area, 30.0);
        assert_eq!(cfg.pipeline.person_threshold, 10);
        assert_eq!(cfg.inference.backend, InferenceBackendKind::Stub);
        assert_eq!(cfg.inference.roboflow.model_id, DEFAULT_MODEL_ID);
        assert_eq!(cfg.inference.roboflow.confidence_pct, 15);
        assert_eq!(cfg.publish.backend, PublishBackendKind::Filesystem);
        assert_eq!(cfg.publish.object_name, "live_feed.jpg");
        assert_eq!(cfg.publish.record_key, "live_stats");
        assert_eq!(cfg.publish.memory_history, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(cfg.source.timeout, Some(Duration::from_secs(30)));
        assert!(cfg.preview.is_none());
        Ok(())
    }

    #[test]
    fn toml_file_is_parsed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sentinel.toml");
        std::fs::write(
            &path,
            r#"
[source]
url = "http://10.0.0.7:81/stream"
target_fps = 5

[detection]
skip_interval = 6
min_area = 12.5

[inference]
timeout_secs = 0

[publish]
backend = "memory"
memory_history = 8
"#,
        )?;
        let mut cfg = SentinelConfig::from_file(read_config_file(&path)?)?;
        cfg.validate()?;
        assert_eq!(cfg.source.url, "http://10.0.0.7:81/stream");
        assert_eq!(cfg.source.target_fps, 5);
        assert_eq!(cfg.pipeline.skip_interval, 6);
        assert_eq!(cfg.pipeline.min_area, 12.5);
        assert_eq!(cfg.inference.roboflow.timeout, None);
        assert_eq!(cfg.publish.backend, PublishBackendKind::Memory);
        assert_eq!(cfg.publish.memory_history, 8);
        Ok(())
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!(
            "Roboflow".parse::<InferenceBackendKind>().unwrap(),
            InferenceBackendKind::Roboflow
        );
        assert_eq!(
            "fs".parse::<PublishBackendKind>().unwrap(),
            PublishBackendKind::Filesystem
        );
        assert!("yolo".parse::<InferenceBackendKind>().is_err());
        assert!("s3".parse::<PublishBackendKind>().is_err());
    }

    #[test]
    fn validation_rejects_bad_values() -> Result<()> {
        let base = SentinelConfig::from_file(SentinelConfigFile::default())?;

        let mut cfg = base.clone();
        cfg.pipeline.skip_interval = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.pipeline.min_area = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.pipeline.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.inference.backend = InferenceBackendKind::Roboflow;
        assert!(cfg.validate().is_err());
        cfg.inference.roboflow.api_key = "secret".into();
        assert!(cfg.validate().is_ok());

        let mut cfg = base;
        cfg.publish.backend = PublishBackendKind::Firebase;
        cfg.publish.firebase.bucket = "demo.appspot.com".into();
        assert!(cfg.validate().is_err());
        cfg.publish.firebase.database_url = "https://demo.firebaseio.com".into();
        assert!(cfg.validate().is_ok());
        Ok(())
    }
}
