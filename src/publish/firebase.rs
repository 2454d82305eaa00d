//! Firebase REST stores.
//!
//! - `FirebaseStorage`: media upload to Cloud Storage,
//!   `POST {storage_api}/v0/b/{bucket}/o?uploadType=media&name={name}`.
//!   The returned reference is `{public_base}/{bucket}/{name}`.
//! - `FirebaseRealtimeDb`: full overwrite of one node,
//!   `PUT {database_url}/{key}.json`.
//!
//! The auth token is opaque and optional; when present it is sent as
//! `Authorization: Bearer …` to Storage and as `?auth=…` to the database.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{MetricsRecord, ObjectStore, RecordStore};
use crate::transport::{describe_http_error, http_agent};

pub const DEFAULT_STORAGE_API: &str = "https://firebasestorage.googleapis.com";
pub const DEFAULT_PUBLIC_BASE: &str = "https://storage.googleapis.com";

#[derive(Clone, Debug)]
pub struct FirebaseConfig {
    /// e.g. `my-project.appspot.com`
    pub bucket: String,
    /// e.g. `https://my-project.firebaseio.com`
    pub database_url: String,
    pub storage_api: String,
    pub public_base: String,
    pub auth_token: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            database_url: String::new(),
            storage_api: DEFAULT_STORAGE_API.to_string(),
            public_base: DEFAULT_PUBLIC_BASE.to_string(),
            auth_token: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

pub struct FirebaseStorage {
    config: FirebaseConfig,
    agent: ureq::Agent,
}

impl FirebaseStorage {
    pub fn new(config: FirebaseConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(anyhow!("firebase storage requires a bucket"));
        }
        url::Url::parse(&config.storage_api)
            .with_context(|| format!("parse storage api url {}", config.storage_api))?;
        let agent = http_agent("snapshot upload", config.timeout);
        Ok(Self { config, agent })
    }

    pub fn upload_url(&self) -> String {
        upload_url(&self.config.storage_api, &self.config.bucket)
    }

    pub fn public_url(&self, name: &str) -> String {
        public_url(&self.config.public_base, &self.config.bucket, name)
    }
}

impl ObjectStore for FirebaseStorage {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<String> {
        let mut request = self
            .agent
            .post(&self.upload_url())
            .query("uploadType", "media")
            .query("name", name)
            .set("Content-Type", "image/jpeg");
        if let Some(token) = &self.config.auth_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request
            .send_bytes(bytes)
            .map_err(|e| anyhow!("upload {}: {}", name, describe_http_error(e)))?;
        Ok(self.public_url(name))
    }
}

pub struct FirebaseRealtimeDb {
    config: FirebaseConfig,
    agent: ureq::Agent,
}

impl FirebaseRealtimeDb {
    pub fn new(config: FirebaseConfig) -> Result<Self> {
        url::Url::parse(&config.database_url)
            .with_context(|| format!("parse database url {:?}", config.database_url))?;
        let agent = http_agent("record write", config.timeout);
        Ok(Self { config, agent })
    }

    pub fn record_url(&self, key: &str) -> String {
        record_url(&self.config.database_url, key)
    }
}

impl RecordStore for FirebaseRealtimeDb {
    fn set(&mut self, key: &str, record: &MetricsRecord) -> Result<()> {
        let body = serde_json::to_string(record).context("serialize record")?;
        let mut request = self
            .agent
            .put(&self.record_url(key))
            .set("Content-Type", "application/json");
        if let Some(token) = &self.config.auth_token {
            request = request.query("auth", token);
        }
        request
            .send_string(&body)
            .map_err(|e| anyhow!("write {}: {}", key, describe_http_error(e)))?;
        Ok(())
    }
}

fn upload_url(storage_api: &str, bucket: &str) -> String {
    format!(
        "{}/v0/b/{}/o",
        storage_api.trim_end_matches('/'),
        bucket.trim_matches('/')
    )
}

fn public_url(public_base: &str, bucket: &str, name: &str) -> String {
    format!(
        "{}/{}/{}",
        public_base.trim_end_matches('/'),
        bucket.trim_matches('/'),
        name.trim_start_matches('/')
    )
}

fn record_url(database_url: &str, key: &str) -> String {
    format!(
        "{}/{}.json",
        database_url.trim_end_matches('/'),
        key.trim_matches('/')
    )
}
