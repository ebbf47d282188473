//! Shared key-value store seam backing registries, locks, and markers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// Result of the atomic get-or-lock operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GetOrLock {
    /// A record already exists under the record key.
    Found(Value),
    /// No record exists; the caller now holds the creation lock.
    LockAcquired,
    /// No record exists; another caller holds the creation lock.
    Locked,
}

/// Key-value store used for the sandbox registry, creation locks, stream
/// ids, interrupt markers, and run journals.
///
/// The combined operations (`get_or_lock`, `set_and_delete`, `delete_if_eq`)
/// each correspond to one server-side script in a networked implementation
/// and must execute atomically; a get-then-set composed from the simple
/// operations would race.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the live value under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes `value` under `key`, with an optional time-to-live.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Resets the time-to-live of a live `key`. No effect on absent keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Atomically: return the value under `record_key` if present; otherwise
    /// attempt to acquire `lock_key` (set-if-absent) with `lock_ttl`.
    async fn get_or_lock(
        &self,
        record_key: &str,
        lock_key: &str,
        lock_ttl: Duration,
    ) -> Result<GetOrLock>;

    /// Atomically: write `value` under `key` (with optional ttl) and remove
    /// `delete_key`, so no reader observes the deletion without the write.
    async fn set_and_delete(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        delete_key: &str,
    ) -> Result<()>;

    /// Atomic compare-and-delete: removes `key` only if its stored value
    /// (or, when `field` is given, that field of the stored JSON object)
    /// equals `expected`. Returns whether a deletion happened.
    async fn delete_if_eq(&self, key: &str, field: Option<&str>, expected: &str) -> Result<bool>;
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`KeyValueStore`] with lazy per-key expiry.
///
/// Every trait method takes the single internal mutex once, which is what
/// makes the combined operations atomic. Suitable for single-process
/// deployments and as the store fake in tests; expiry follows tokio's clock
/// so paused-time tests control it directly.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a dead entry and returns the live value under `key`, if any.
    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<Value> {
        match entries.get(key) {
            Some(entry) if entry.live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live_value(&mut entries, key, Instant::now()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if Self::live_value(&mut entries, key, now).is_some() {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn get_or_lock(
        &self,
        record_key: &str,
        lock_key: &str,
        lock_ttl: Duration,
    ) -> Result<GetOrLock> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(value) = Self::live_value(&mut entries, record_key, now) {
            return Ok(GetOrLock::Found(value));
        }
        if Self::live_value(&mut entries, lock_key, now).is_some() {
            return Ok(GetOrLock::Locked);
        }
        entries.insert(
            lock_key.to_string(),
            Entry {
                value: Value::Bool(true),
                expires_at: Some(now + lock_ttl),
            },
        );
        Ok(GetOrLock::LockAcquired)
    }

    async fn set_and_delete(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        delete_key: &str,
    ) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        entries.insert(key.to_string(), Entry { value, expires_at });
        entries.remove(delete_key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, field: Option<&str>, expected: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let Some(value) = Self::live_value(&mut entries, key, now) else {
            return Ok(false);
        };
        let stored = match field {
            Some(field) => value.get(field).and_then(Value::as_str),
            None => value.as_str(),
        };
        if stored == Some(expected) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
