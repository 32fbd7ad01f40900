//! In-process key-value store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageError;
use crate::traits::{KeyValueStore, RealTimeProvider, TimeProvider};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// TTL-aware store kept in a `HashMap`.
///
/// Contents are lost when the process exits. Expired entries are dropped
/// lazily on read.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn TimeProvider>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(RealTimeProvider))
    }
}

impl MemoryStore {
    /// Create an empty store that checks expiry against `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of entries held, including expired ones not yet dropped.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poison_error) => poison_error.into_inner().len(),
        }
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(operation: &'static str) -> StorageError {
        tracing::error!(operation, "MemoryStore lock poisoned");
        StorageError::Unavailable {
            message: format!("memory store lock poisoned during {operation}"),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().map_err(|_| Self::poisoned("get"))?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at.map_or(true, |at| at > now) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().map_err(|_| Self::poisoned("get"))?;
        // Re-check under the write lock; a concurrent set may have refreshed it.
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now))
        {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl));

        let mut entries = self.entries.write().map_err(|_| Self::poisoned("set"))?;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned("delete"))?;
        Ok(entries.remove(key).is_some())
    }
}
