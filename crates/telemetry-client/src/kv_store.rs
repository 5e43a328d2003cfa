//! Offline key/value persistence trait (spec §9, §6 "Persisted state
//! layout").
//!
//! Grounded on the teacher's `services/forwarder/src/storage/journal.rs`:
//! there, `Journal` is the single-writer, keyed, prunable persistence
//! boundary for one forwarder's unacked events. Here the same shape is
//! abstracted behind a trait because the persisted state is small
//! per-stream/per-queue blobs (buffers, the outbound queue, pending
//! alert acks) rather than an append-only SQL log, and because tests
//! need a mock in place of real disk (spec §9: "mocked in tests").

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("io failed: {0}")]
    Io(String),
}

/// A small key/value interface with `save/load/clear/size`, as named in
/// spec §9. Values are opaque bytes; callers JSON-encode.
pub trait KvStore: Send + Sync {
    fn save(&self, key: &str, value: Vec<u8>) -> Result<(), KvError>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    fn clear(&self, key: &str) -> Result<(), KvError>;
    fn size(&self, key: &str) -> Result<usize, KvError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// In-memory store used by unit/integration tests and as the default when
/// no durable backend is configured.
#[derive(Default)]
pub struct InMemoryKvStore {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    fn save(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.inner.lock().unwrap().insert(key.to_owned(), value);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.inner.lock().unwrap().get(key).cloned())
    }

    fn clear(&self, key: &str) -> Result<(), KvError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    fn size(&self, key: &str) -> Result<usize, KvError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .get(key)
            .map(Vec::len)
            .unwrap_or(0))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// JSON-file backed store for the demo binary: one file per process,
/// whole-map read/write-back on every call. Not intended for high churn —
/// production embedders are expected to supply their own [`KvStore`].
pub struct JsonFileKvStore {
    path: std::path::PathBuf,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl JsonFileKvStore {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, KvError> {
        let path = path.into();
        let cache = if path.exists() {
            let data = std::fs::read(&path).map_err(|e| KvError::Io(e.to_string()))?;
            serde_json::from_slice(&data).map_err(|e| KvError::Serialization(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(JsonFileKvStore {
            path,
            cache: Mutex::new(cache),
        })
    }

    fn flush(&self, map: &HashMap<String, Vec<u8>>) -> Result<(), KvError> {
        let data = serde_json::to_vec(map).map_err(|e| KvError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, data).map_err(|e| KvError::Io(e.to_string()))
    }
}

impl KvStore for JsonFileKvStore {
    fn save(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let mut map = self.cache.lock().unwrap();
        map.insert(key.to_owned(), value);
        self.flush(&map)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.cache.lock().unwrap().get(key).cloned())
    }

    fn clear(&self, key: &str) -> Result<(), KvError> {
        let mut map = self.cache.lock().unwrap();
        map.remove(key);
        self.flush(&map)
    }

    fn size(&self, key: &str) -> Result<usize, KvError> {
        Ok(self.cache.lock().unwrap().get(key).map(Vec::len).unwrap_or(0))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .cache
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemoryKvStore::new();
        store.save("buffers/stream-1", b"abc".to_vec()).unwrap();
        assert_eq!(store.load("buffers/stream-1").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(store.size("buffers/stream-1").unwrap(), 3);
        store.clear("buffers/stream-1").unwrap();
        assert_eq!(store.load("buffers/stream-1").unwrap(), None);
    }

    #[test]
    fn prefix_listing_finds_keyed_entries() {
        let store = InMemoryKvStore::new();
        store.save("buffers/a", vec![1]).unwrap();
        store.save("buffers/b", vec![2]).unwrap();
        store.save("outbound_queue", vec![3]).unwrap();
        let mut keys = store.keys_with_prefix("buffers/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["buffers/a".to_owned(), "buffers/b".to_owned()]);
    }
}
