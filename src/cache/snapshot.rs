//! Point-in-time export of cache contents
//!
//! The consumer process writes one of these so other processes can inspect
//! its derived projections. It also records the consumer-group offsets the
//! projections cover; a restarted consumer resumes from those, not from the
//! broker's own offsets, so nothing committed after the snapshot is lost.

use super::CacheStore;
use crate::error::{AclError, AclResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// A cached value: plain text or a hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotValue {
    Text(String),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: BTreeMap<String, SnapshotValue>,
    /// Committed offsets per topic, one per partition
    #[serde(default)]
    pub offsets: BTreeMap<String, Vec<u64>>,
}

impl CacheSnapshot {
    pub fn new(entries: BTreeMap<String, SnapshotValue>) -> Self {
        Self {
            taken_at: Utc::now(),
            entries,
            offsets: BTreeMap::new(),
        }
    }

    /// Offsets recorded for `topic`; empty means start from the beginning
    pub fn offsets_for(&self, topic: &str) -> &[u64] {
        self.offsets.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Hash stored at `key`, empty when missing or not a hash
    pub fn hash(&self, key: &str) -> BTreeMap<String, String> {
        match self.entries.get(key) {
            Some(SnapshotValue::Hash(h)) => h.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// Write atomically via a temp file and rename
    pub async fn save(&self, path: &Path) -> AclResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| AclError::io(format!("writing snapshot {}", tmp.display()), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| AclError::io(format!("replacing snapshot {}", path.display()), e))?;
        debug!("Wrote cache snapshot with {} keys", self.entries.len());
        Ok(())
    }

    /// Write every entry back into `cache`
    ///
    /// Strings get `text_ttl` and hashes `hash_ttl`; returns the key count.
    pub async fn restore_into(
        &self,
        cache: &dyn CacheStore,
        text_ttl: Duration,
        hash_ttl: Duration,
    ) -> AclResult<usize> {
        for (key, value) in &self.entries {
            match value {
                SnapshotValue::Text(text) => cache.set_ex(key, text, text_ttl).await?,
                SnapshotValue::Hash(fields) => {
                    for (field, v) in fields {
                        cache.hset(key, field, v).await?;
                    }
                    cache.expire(key, hash_ttl).await?;
                }
            }
        }
        debug!("Restored {} keys from snapshot taken at {}", self.entries.len(), self.taken_at);
        Ok(self.entries.len())
    }

    pub async fn load(path: &Path) -> AclResult<Self> {
        if !path.exists() {
            return Err(AclError::not_found(format!(
                "cache snapshot {} (run: aclsync consume)",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| AclError::io(format!("reading snapshot {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }
}
