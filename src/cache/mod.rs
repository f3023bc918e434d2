//! Key-value cache layers
//!
//! `CacheStore` mirrors the handful of Redis commands the cache layers use.
//! Nothing above this module treats the cache as authoritative: every
//! failure is logged and handled as a miss.

mod memory;
mod metadata;
mod snapshot;
mod team;

pub use memory::MemoryCache;
pub use metadata::MetadataCache;
pub use snapshot::{CacheSnapshot, SnapshotValue};
pub use team::{CachedMember, CachedTeam, CachedTeamRepository};

use crate::error::{AclError, AclResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Key-value store with string and hash values and per-key TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// String value at `key`
    async fn get(&self, key: &str) -> AclResult<Option<String>>;

    /// Set a string value with expiry
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> AclResult<()>;

    /// Delete a key of any type; returns whether it existed
    async fn del(&self, key: &str) -> AclResult<bool>;

    /// Reset the expiry of an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> AclResult<bool>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> AclResult<()>;

    async fn hget(&self, key: &str, field: &str) -> AclResult<Option<String>>;

    /// Delete a hash field; an emptied hash disappears
    async fn hdel(&self, key: &str, field: &str) -> AclResult<bool>;

    async fn hgetall(&self, key: &str) -> AclResult<HashMap<String, String>>;

    /// Health check
    async fn ping(&self) -> AclResult<()>;
}

/// Cache key layout
pub mod keys {
    use uuid::Uuid;

    /// Cache-aside team projection
    pub fn team(id: Uuid) -> String {
        format!("team:{}", id)
    }

    /// Consumer-maintained membership hash
    pub fn team_members(id: Uuid) -> String {
        format!("team:{}:members", id)
    }

    /// Consumer-maintained ACL hash
    pub fn asset_acl(id: Uuid) -> String {
        format!("asset:{}:acl", id)
    }

    pub fn folder(id: Uuid) -> String {
        format!("folder:{}", id)
    }

    pub fn note(id: Uuid) -> String {
        format!("note:{}", id)
    }
}

/// Run a cache call with an upper time bound
pub(crate) async fn bounded<T>(
    limit: Duration,
    op: &str,
    fut: impl Future<Output = AclResult<T>>,
) -> AclResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AclError::Timeout(format!("cache {} after {:?}", op, limit))),
    }
}
