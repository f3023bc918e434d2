//! Short-lived folder and note metadata cache

use super::{bounded, keys, CacheStore};
use crate::config::CacheConfig;
use crate::store::{Folder, FolderId, Note, NoteId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// JSON blobs under `folder:<id>` and `note:<id>`
#[derive(Clone)]
pub struct MetadataCache {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    op_timeout: Duration,
}

impl MetadataCache {
    pub fn new(cache: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            cache,
            ttl: config.metadata_ttl(),
            op_timeout: config.op_timeout(),
        }
    }

    pub async fn folder(&self, id: FolderId) -> Option<Folder> {
        self.get_json(&keys::folder(id)).await
    }

    pub async fn put_folder(&self, folder: &Folder) {
        self.put_json(&keys::folder(folder.id), folder).await
    }

    pub async fn invalidate_folder(&self, id: FolderId) {
        self.del(&keys::folder(id)).await
    }

    pub async fn note(&self, id: NoteId) -> Option<Note> {
        self.get_json(&keys::note(id)).await
    }

    pub async fn put_note(&self, note: &Note) {
        self.put_json(&keys::note(note.id), note).await
    }

    pub async fn invalidate_note(&self, id: NoteId) {
        self.del(&keys::note(id)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match bounded(self.op_timeout, "get", self.cache.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!("Metadata cache hit: {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Metadata cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not encode {} for cache: {}", key, e);
                return;
            }
        };
        if let Err(e) = bounded(self.op_timeout, "set", self.cache.set_ex(key, &raw, self.ttl)).await
        {
            warn!("Metadata cache write failed for {}: {}", key, e);
        }
    }

    async fn del(&self, key: &str) {
        if let Err(e) = bounded(self.op_timeout, "del", self.cache.del(key)).await {
            warn!("Metadata cache invalidation failed for {}: {}", key, e);
        }
    }
}
