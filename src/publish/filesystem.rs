//! Local directory acting as both stores.
//!
//! Objects land at `{root}/{name}`, records at `{root}/{key}.json`. Every write
//! goes to a sibling temp file first and is renamed into place, so a reader
//! polling the directory never sees a half-written snapshot.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{MetricsRecord, ObjectStore, RecordStore};

#[derive(Clone, Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Use `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create publish dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(safe_name(name)?))
    }

    pub fn record_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.json", safe_name(key)?)))
    }

    /// Read back a record written by `set`.
    pub fn read_record(&self, key: &str) -> Result<MetricsRecord> {
        let path = self.record_path(key)?;
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }
}

impl ObjectStore for FilesystemStore {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.object_path(name)?;
        write_atomic(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        let absolute = fs::canonicalize(&path)
            .with_context(|| format!("resolve {}", path.display()))?;
        let url = url::Url::from_file_path(&absolute)
            .map_err(|_| anyhow!("{} is not representable as a file url", absolute.display()))?;
        Ok(url.to_string())
    }
}

impl RecordStore for FilesystemStore {
    fn set(&mut self, key: &str, record: &MetricsRecord) -> Result<()> {
        let path = self.record_path(key)?;
        let json = serde_json::to_vec_pretty(record).context("serialize record")?;
        write_atomic(&path, &json).with_context(|| format!("write {}", path.display()))
    }
}

/// Names are single path components; anything that could escape `root` is
/// rejected.
fn safe_name(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if valid {
        Ok(name)
    } else {
        Err(anyhow!("invalid store name {:?}", name))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SafetyStatus;

    fn record() -> MetricsRecord {
        MetricsRecord {
            crowd_count: 3,
            flashlight_detected: true,
            flashlight_count: 1,
            image_url: String::new(),
            timestamp: 42,
            status: SafetyStatus::Danger,
        }
    }

    #[test]
    fn put_returns_file_url_and_overwrites() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = FilesystemStore::open(dir.path().join("out"))?;

        let url = store.put("live_feed.jpg", b"first")?;
        store.put("live_feed.jpg", b"second")?;

        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/live_feed.jpg"));
        assert_eq!(fs::read(store.object_path("live_feed.jpg")?)?, b"second");
        assert!(!store.root().join("live_feed.jpg.tmp").exists());
        Ok(())
    }

    #[test]
    fn set_writes_json_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = FilesystemStore::open(dir.path())?;
        store.set("live_stats", &record())?;

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("live_stats.json"))?)?;
        assert_eq!(raw["status"], "DANGER");
        assert_eq!(raw["flashlight_detected"], true);
        assert_eq!(store.read_record("live_stats")?, record());
        Ok(())
    }

    #[test]
    fn path_traversal_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = FilesystemStore::open(dir.path())?;
        assert!(store.put("../escape.jpg", b"x").is_err());
        assert!(store.set("..", &record()).is_err());
        assert!(store.put("", b"x").is_err());
        Ok(())
    }
}
