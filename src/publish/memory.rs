use std::collections::{HashMap, VecDeque};

use anyhow::Result;

use super::{MetricsRecord, ObjectStore, RecordStore};

/// Record writes kept by [`InMemoryStore::new`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// In-memory object + record store (tests, dry runs).
///
/// Keeps the latest value per name/key like a remote store would, plus the
/// most recent record writes, bounded by the history capacity.
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    objects: HashMap<String, Vec<u8>>,
    records: HashMap<String, MetricsRecord>,
    history: VecDeque<MetricsRecord>,
    history_capacity: usize,
    put_calls: u64,
    set_calls: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `capacity` record writes in its history.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            objects: HashMap::new(),
            records: HashMap::new(),
            history: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            history_capacity: capacity,
            put_calls: 0,
            set_calls: 0,
        }
    }

    pub fn object(&self, name: &str) -> Option<&[u8]> {
        self.objects.get(name).map(|bytes| bytes.as_slice())
    }

    pub fn record(&self, key: &str) -> Option<&MetricsRecord> {
        self.records.get(key)
    }

    /// The most recent record writes, oldest first.
    pub fn history(&self) -> &VecDeque<MetricsRecord> {
        &self.history
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls
    }

    pub fn set_calls(&self) -> u64 {
        self.set_calls
    }
}

impl ObjectStore for InMemoryStore {
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<String> {
        self.put_calls += 1;
        self.objects.insert(name.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", name))
    }
}

impl RecordStore for InMemoryStore {
    fn set(&mut self, key: &str, record: &MetricsRecord) -> Result<()> {
        self.set_calls += 1;
        self.records.insert(key.to_string(), record.clone());
        if self.history_capacity > 0 {
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(record.clone());
        }
        Ok(())
    }
}
