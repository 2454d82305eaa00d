//! Remote publishing of the latest snapshot.
//!
//! Two capabilities, both external I/O:
//! - `ObjectStore::put`: store the annotated frame under a fixed name and
//!   return a durable reference to it.
//! - `RecordStore::set`: overwrite one well-known record with the full
//!   metrics of the cycle plus that reference.
//!
//! The publisher never patches a record. The whole `MetricsRecord` is built
//! from one `MetricsSnapshot` before the first write is issued, so a record
//! never pairs counts from different cycles.

pub mod filesystem;
pub mod firebase;
pub mod memory;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{PublishBackendKind, PublishSettings};
use crate::error::PipelineError;
use crate::status::{MetricsSnapshot, SafetyStatus};

pub use filesystem::FilesystemStore;
pub use firebase::{FirebaseConfig, FirebaseRealtimeDb, FirebaseStorage};
pub use memory::{InMemoryStore, DEFAULT_HISTORY_CAPACITY};

pub const DEFAULT_OBJECT_NAME: &str = "live_feed.jpg";
pub const DEFAULT_RECORD_KEY: &str = "live_stats";

/// Blob store holding the latest annotated frame.
pub trait ObjectStore {
    /// Store `bytes` under `name`, overwriting any previous object, and return
    /// a retrievable URL for it.
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<String>;
}

/// Key/value store holding the dashboard record.
pub trait RecordStore {
    /// Replace the value at `key` with `record` (full overwrite, not a merge).
    fn set(&mut self, key: &str, record: &MetricsRecord) -> Result<()>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<String> {
        (**self).put(name, bytes)
    }
}

impl<T: RecordStore + ?Sized> RecordStore for Box<T> {
    fn set(&mut self, key: &str, record: &MetricsRecord) -> Result<()> {
        (**self).set(key, record)
    }
}

/// Wire shape of the dashboard record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub crowd_count: u32,
    pub flashlight_detected: bool,
    pub flashlight_count: u32,
    pub image_url: String,
    pub timestamp: u64,
    pub status: SafetyStatus,
}

impl MetricsRecord {
    pub fn new(metrics: &MetricsSnapshot, image_url: &str) -> Self {
        Self {
            crowd_count: metrics.person_count,
            flashlight_detected: metrics.flashlight_count > 0,
            flashlight_count: metrics.flashlight_count,
            image_url: image_url.to_string(),
            timestamp: metrics.timestamp,
            status: metrics.status,
        }
    }
}

/// Writes the snapshot image and record to the configured stores.
pub struct RemotePublisher<O, R> {
    objects: O,
    records: R,
    object_name: String,
    record_key: String,
}

impl<O: ObjectStore, R: RecordStore> RemotePublisher<O, R> {
    pub fn new(objects: O, records: R) -> Self {
        Self {
            objects,
            records,
            object_name: DEFAULT_OBJECT_NAME.to_string(),
            record_key: DEFAULT_RECORD_KEY.to_string(),
        }
    }

    pub fn with_names(mut self, object_name: &str, record_key: &str) -> Self {
        self.object_name = object_name.to_string();
        self.record_key = record_key.to_string();
        self
    }

    pub fn objects(&self) -> &O {
        &self.objects
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    /// Publish one cycle. Returns the image URL written into the record.
    ///
    /// If the upload fails the record is not touched.
    pub fn publish(
        &mut self,
        frame_jpeg: &[u8],
        metrics: &MetricsSnapshot,
    ) -> Result<String, PipelineError> {
        let image_url = self
            .objects
            .put(&self.object_name, frame_jpeg)
            .map_err(|e| {
                PipelineError::publish_failed(format!("put {}: {:#}", self.object_name, e))
            })?;

        let record = MetricsRecord::new(metrics, &image_url);
        self.records
            .set(&self.record_key, &record)
            .map_err(|e| PipelineError::publish_failed(format!("set {}: {:#}", self.record_key, e)))?;

        Ok(image_url)
    }
}

/// Publisher over the configured stores.
pub type DynPublisher = RemotePublisher<Box<dyn ObjectStore>, Box<dyn RecordStore>>;

/// Build the publisher named by `settings.backend`.
pub fn publisher_from_settings(settings: &PublishSettings) -> Result<DynPublisher> {
    let (objects, records): (Box<dyn ObjectStore>, Box<dyn RecordStore>) = match settings.backend
    {
        PublishBackendKind::Memory => {
            log::warn!(
                "publishing to memory only; nothing leaves this process (keeping {} records)",
                settings.memory_history
            );
            (
                Box::new(InMemoryStore::with_history_capacity(0)),
                Box::new(InMemoryStore::with_history_capacity(settings.memory_history)),
            )
        }
        PublishBackendKind::Filesystem => {
            let store = FilesystemStore::open(&settings.dir)?;
            log::info!("publishing to directory {}", store.root().display());
            (Box::new(store.clone()), Box::new(store))
        }
        PublishBackendKind::Firebase => {
            let storage = FirebaseStorage::new(settings.firebase.clone())?;
            let database = FirebaseRealtimeDb::new(settings.firebase.clone())?;
            log::info!(
                "publishing to firebase bucket {} and {}",
                settings.firebase.bucket,
                database.record_url(&settings.record_key)
            );
            (Box::new(storage), Box::new(database))
        }
    };
    Ok(RemotePublisher::new(objects, records)
        .with_names(&settings.object_name, &settings.record_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct BrokenObjects;

    impl ObjectStore for BrokenObjects {
        fn put(&mut self, _name: &str, _bytes: &[u8]) -> Result<String> {
            Err(anyhow!("bucket unavailable"))
        }
    }

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            person_count: 12,
            flashlight_count: 2,
            status: SafetyStatus::Danger,
            timestamp: 1_700_000_123,
        }
    }

    #[test]
    fn record_mirrors_snapshot() {
        let record = MetricsRecord::new(&snapshot(), "https://img/live_feed.jpg");
        assert_eq!(record.crowd_count, 12);
        assert!(record.flashlight_detected);
        assert_eq!(record.flashlight_count, 2);
        assert_eq!(record.status, SafetyStatus::Danger);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "DANGER");
        assert_eq!(json["image_url"], "https://img/live_feed.jpg");
        assert_eq!(json["timestamp"], 1_700_000_123u64);
    }

    #[test]
    fn publish_writes_object_then_record() {
        let mut publisher = RemotePublisher::new(InMemoryStore::new(), InMemoryStore::new());
        let url = publisher.publish(b"jpeg", &snapshot()).unwrap();

        assert_eq!(url, "memory://live_feed.jpg");
        assert_eq!(publisher.objects().object("live_feed.jpg"), Some(&b"jpeg"[..]));
        let record = publisher.records().record("live_stats").unwrap();
        assert_eq!(record.image_url, url);
        assert_eq!(record.crowd_count, 12);
    }

    #[test]
    fn failed_upload_leaves_record_untouched() {
        let mut publisher = RemotePublisher::new(BrokenObjects, InMemoryStore::new());
        let err = publisher.publish(b"jpeg", &snapshot()).unwrap_err();

        assert!(matches!(err, PipelineError::PublishFailed(_)));
        assert!(publisher.records().record("live_stats").is_none());
        assert_eq!(publisher.records().set_calls(), 0);
    }

    #[test]
    fn filesystem_publisher_from_settings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = PublishSettings {
            backend: PublishBackendKind::Filesystem,
            object_name: "gate_b.jpg".to_string(),
            record_key: "gate_b".to_string(),
            dir: dir.path().join("dashboard"),
            memory_history: DEFAULT_HISTORY_CAPACITY,
            firebase: FirebaseConfig::default(),
        };
        let mut publisher = publisher_from_settings(&settings)?;
        let url = publisher.publish(b"jpeg", &snapshot())?;

        assert!(url.ends_with("/gate_b.jpg"));
        let record: MetricsRecord =
            serde_json::from_slice(&std::fs::read(dir.path().join("dashboard/gate_b.json"))?)?;
        assert_eq!(record.image_url, url);
        Ok(())
    }

    #[test]
    fn firebase_publisher_requires_bucket() {
        let settings = PublishSettings {
            backend: PublishBackendKind::Firebase,
            object_name: DEFAULT_OBJECT_NAME.to_string(),
            record_key: DEFAULT_RECORD_KEY.to_string(),
            dir: std::path::PathBuf::new(),
            memory_history: DEFAULT_HISTORY_CAPACITY,
            firebase: FirebaseConfig::default(),
        };
        assert!(publisher_from_settings(&settings).is_err());
    }

    #[test]
    fn custom_names_are_used() {
        let mut publisher = RemotePublisher::new(InMemoryStore::new(), InMemoryStore::new())
            .with_names("stage_a.jpg", "stage_a_stats");
        publisher.publish(b"x", &snapshot()).unwrap();
        assert!(publisher.objects().object("stage_a.jpg").is_some());
        assert!(publisher.records().record("stage_a_stats").is_some());
    }
}
