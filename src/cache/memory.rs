//! In-process `CacheStore` backed by `DashMap`

use super::snapshot::{CacheSnapshot, SnapshotValue};
use super::CacheStore;
use crate::error::{AclError, AclResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// Cache held in process memory
///
/// Expired keys read as absent and are dropped lazily; `purge_expired`
/// sweeps the rest. `set_unavailable` makes every call fail, which is how
/// tests exercise the miss-on-error paths.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Commands issued so far, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Remove all expired keys, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired cache keys", removed);
        }
        removed
    }

    /// Live key count
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every live key
    pub fn snapshot(&self) -> CacheSnapshot {
        let entries: BTreeMap<String, SnapshotValue> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired())
            .map(|e| {
                let value = match &e.value {
                    Value::Text(s) => SnapshotValue::Text(s.clone()),
                    Value::Hash(h) => {
                        SnapshotValue::Hash(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    }
                };
                (e.key().clone(), value)
            })
            .collect();
        CacheSnapshot::new(entries)
    }

    fn begin(&self) -> AclResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AclError::Cache("connection refused".to_string()));
        }
        Ok(())
    }

    fn evict_if_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, e| e.is_expired());
    }
}

fn wrong_type(key: &str) -> AclError {
    AclError::Cache(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> AclResult<Option<String>> {
        self.begin()?;
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Text(s) => Ok(Some(s.clone())),
                Value::Hash(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AclResult<()> {
        self.begin()?;
        self.entries.insert(
            key.to_string(),
            Entry::new(Value::Text(value.to_string()), Some(ttl)),
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AclResult<bool> {
        self.begin()?;
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| !e.is_expired())
            .unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AclResult<bool> {
        self.begin()?;
        self.evict_if_expired(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> AclResult<()> {
        self.begin()?;
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        match &mut entry.value {
            Value::Hash(h) => {
                h.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> AclResult<Option<String>> {
        self.begin()?;
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h.get(field).cloned()),
                Value::Text(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> AclResult<bool> {
        self.begin()?;
        self.evict_if_expired(key);
        let removed = match self.entries.get_mut(key) {
            None => return Ok(false),
            Some(mut entry) => match &mut entry.value {
                Value::Hash(h) => h.remove(field).is_some(),
                Value::Text(_) => return Err(wrong_type(key)),
            },
        };
        self.entries
            .remove_if(key, |_, e| matches!(&e.value, Value::Hash(h) if h.is_empty()));
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> AclResult<HashMap<String, String>> {
        self.begin()?;
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(HashMap::new()),
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h.clone()),
                Value::Text(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn ping(&self) -> AclResult<()> {
        self.begin()
    }
}
