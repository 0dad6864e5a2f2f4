//! Durable Persistence Port
//!
//! Injectable key-value medium the cache mirrors entries into. The port is
//! synchronous and best-effort: implementations must never panic on bad
//! data, and callers treat every failure as a cache miss.

use std::collections::HashMap;
use std::sync::Mutex;

// == Persistence Port ==
/// Key-value medium addressed by string keys under a per-store prefix.
///
/// Values are serialized cache records. Implementations are free to drop
/// writes (quota, unavailability); the cache functions without them.
pub trait PersistencePort: Send + Sync {
    /// Stores a serialized record; best-effort, failures are swallowed.
    fn save(&self, key: &str, record: &str);

    /// Loads a serialized record if present.
    fn load(&self, key: &str) -> Option<String>;

    /// Removes a single record; no-op if absent.
    fn remove(&self, key: &str);

    /// Lists every stored key starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

// == Memory Persistence ==
/// In-process implementation of the port, used by tests and as the default
/// stand-in when the host application supplies no real medium.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, for assertions.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistencePort for MemoryPersistence {
    fn save(&self, key: &str, record: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(key.to_string(), record.to_string());
        }
    }

    fn load(&self, key: &str) -> Option<String> {
        self.records.lock().ok()?.get(key).cloned()
    }

    fn remove(&self, key: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(key);
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.records
            .lock()
            .map(|records| {
                records
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
