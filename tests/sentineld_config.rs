use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use crowd_sentinel::config::{InferenceBackendKind, PublishBackendKind, SentinelConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_SOURCE_URL",
        "SENTINEL_SKIP_INTERVAL",
        "SENTINEL_PERSON_THRESHOLD",
        "SENTINEL_BRIGHT_THRESHOLD",
        "SENTINEL_MIN_AREA",
        "SENTINEL_MODEL_ID",
        "SENTINEL_INFERENCE_BACKEND",
        "SENTINEL_PUBLISH_BACKEND",
        "SENTINEL_PREVIEW_PATH",
        "ROBOFLOW_API_KEY",
        "FIREBASE_AUTH_TOKEN",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "url": "http://192.168.4.1:81/stream",
            "target_fps": 15,
            "timeout_secs": 10
        },
        "detection": {
            "skip_interval": 5,
            "person_threshold": 25,
            "bright_threshold": 240
        },
        "inference": {
            "backend": "roboflow",
            "confidence_pct": 40
        },
        "publish": {
            "backend": "firebase",
            "record_key": "stage_left",
            "firebase": {
                "bucket": "festival.appspot.com",
                "database_url": "https://festival.firebaseio.com"
            }
        },
        "preview": {
            "path": "/tmp/sentinel_preview.jpg",
            "min_interval_ms": 250
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_SKIP_INTERVAL", "2");
    std::env::set_var("SENTINEL_MIN_AREA", "45.5");
    std::env::set_var("SENTINEL_MODEL_ID", "crowd-counting-dataset-w3o7w/3");
    std::env::set_var("ROBOFLOW_API_KEY", "rf-test-key");
    std::env::set_var("FIREBASE_AUTH_TOKEN", "fb-token");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "http://192.168.4.1:81/stream");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.timeout, Some(Duration::from_secs(10)));
    assert_eq!(cfg.pipeline.skip_interval, 2);
    assert_eq!(cfg.pipeline.person_threshold, 25);
    assert_eq!(cfg.pipeline.bright_threshold, 240);
    assert_eq!(cfg.pipeline.min_area, 45.5);
    assert_eq!(cfg.inference.backend, InferenceBackendKind::Roboflow);
    assert_eq!(cfg.inference.roboflow.api_key, "rf-test-key");
    assert_eq!(cfg.inference.roboflow.model_id, "crowd-counting-dataset-w3o7w/3");
    assert_eq!(cfg.inference.roboflow.confidence_pct, 40);
    assert_eq!(cfg.publish.backend, PublishBackendKind::Firebase);
    assert_eq!(cfg.publish.record_key, "stage_left");
    assert_eq!(cfg.publish.object_name, "live_feed.jpg");
    assert_eq!(cfg.publish.firebase.auth_token.as_deref(), Some("fb-token"));
    let preview = cfg.preview.expect("preview configured");
    assert_eq!(preview.min_interval, Duration::from_millis(250));

    clear_env();
}

#[test]
fn env_only_config_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_SOURCE_URL", "stub://gate_b");
    std::env::set_var("SENTINEL_PUBLISH_BACKEND", "memory");
    std::env::set_var("SENTINEL_PREVIEW_PATH", "/tmp/gate_b.jpg");

    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://gate_b");
    assert_eq!(cfg.pipeline.skip_interval, 3);
    assert_eq!(cfg.inference.backend, InferenceBackendKind::Stub);
    assert_eq!(cfg.publish.backend, PublishBackendKind::Memory);
    assert_eq!(
        cfg.preview.map(|p| p.path),
        Some(std::path::PathBuf::from("/tmp/gate_b.jpg"))
    );

    clear_env();
}

#[test]
fn invalid_overrides_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_SKIP_INTERVAL", "0");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_SKIP_INTERVAL", "three");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_INFERENCE_BACKEND", "roboflow");
    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("ROBOFLOW_API_KEY"));
    clear_env();

    std::env::set_var("SENTINEL_PUBLISH_BACKEND", "carrier-pigeon");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_CONFIG", "/nonexistent/sentinel.json");
    assert!(SentinelConfig::load().is_err());
    clear_env();
}
