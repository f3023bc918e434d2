//! Derived projections maintained by the consumer
//!
//! Both are hashes so that every writer and reader agrees on one shape:
//! `asset:<id>:acl` maps user id to access level and `team:<id>:members`
//! maps user id to team role.

use crate::access::{AccessLevel, TeamRole};
use crate::cache::{keys, CacheStore};
use crate::error::AclResult;
use crate::store::{TeamId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// `asset:<id>:acl` reader and writer
#[derive(Clone)]
pub struct AssetAclCache {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl AssetAclCache {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn set_access(&self, asset: Uuid, user: UserId, level: AccessLevel) -> AclResult<()> {
        let key = keys::asset_acl(asset);
        self.cache
            .hset(&key, &user.to_string(), level.as_str())
            .await?;
        self.cache.expire(&key, self.ttl).await?;
        debug!("ACL {} {} = {}", key, user, level);
        Ok(())
    }

    pub async fn remove_access(&self, asset: Uuid, user: UserId) -> AclResult<()> {
        self.cache
            .hdel(&keys::asset_acl(asset), &user.to_string())
            .await?;
        Ok(())
    }

    pub async fn drop_asset(&self, asset: Uuid) -> AclResult<()> {
        self.cache.del(&keys::asset_acl(asset)).await?;
        Ok(())
    }

    /// Keep a still-live asset's ACL from expiring
    pub async fn touch(&self, asset: Uuid) -> AclResult<()> {
        self.cache.expire(&keys::asset_acl(asset), self.ttl).await?;
        Ok(())
    }

    /// Cached level for a user; `None` means not cached, not "no access"
    ///
    /// A hit refreshes the TTL.
    pub async fn get_user_access(&self, asset: Uuid, user: UserId) -> AclResult<Option<AccessLevel>> {
        let key = keys::asset_acl(asset);
        let value = self.cache.hget(&key, &user.to_string()).await?;
        if value.is_some() {
            if let Err(e) = self.cache.expire(&key, self.ttl).await {
                warn!("Could not refresh TTL of {}: {}", key, e);
            }
        }
        Ok(value.map(|v| AccessLevel::parse_lenient(&v)))
    }

    /// Every cached grant on an asset; unparseable users are skipped
    pub async fn get_asset_acl(&self, asset: Uuid) -> AclResult<HashMap<UserId, AccessLevel>> {
        let raw = self.cache.hgetall(&keys::asset_acl(asset)).await?;
        Ok(parse_hash(raw, AccessLevel::parse_lenient))
    }

    /// Replace the whole ACL in one pass
    pub async fn replace(&self, asset: Uuid, grants: &[(UserId, AccessLevel)]) -> AclResult<()> {
        self.drop_asset(asset).await?;
        for (user, level) in grants {
            self.set_access(asset, *user, *level).await?;
        }
        Ok(())
    }
}

/// `team:<id>:members` reader and writer
#[derive(Clone)]
pub struct TeamMembershipCache {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl TeamMembershipCache {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn add_member(&self, team: TeamId, user: UserId, role: TeamRole) -> AclResult<()> {
        let key = keys::team_members(team);
        self.cache
            .hset(&key, &user.to_string(), role.as_str())
            .await?;
        self.cache.expire(&key, self.ttl).await?;
        debug!("Membership {} {} = {}", key, user, role);
        Ok(())
    }

    pub async fn remove_member(&self, team: TeamId, user: UserId) -> AclResult<()> {
        self.cache
            .hdel(&keys::team_members(team), &user.to_string())
            .await?;
        Ok(())
    }

    /// Cached role, or `None` when the user is not in the projection
    pub async fn role(&self, team: TeamId, user: UserId) -> AclResult<Option<TeamRole>> {
        let value = self
            .cache
            .hget(&keys::team_members(team), &user.to_string())
            .await?;
        Ok(value.map(|v| TeamRole::parse_lenient(&v)))
    }

    pub async fn is_member(&self, team: TeamId, user: UserId) -> AclResult<bool> {
        Ok(self.role(team, user).await?.is_some())
    }

    pub async fn members(&self, team: TeamId) -> AclResult<HashMap<UserId, TeamRole>> {
        let raw = self.cache.hgetall(&keys::team_members(team)).await?;
        Ok(parse_hash(raw, TeamRole::parse_lenient))
    }

    pub async fn replace(&self, team: TeamId, members: &[(UserId, TeamRole)]) -> AclResult<()> {
        self.cache.del(&keys::team_members(team)).await?;
        for (user, role) in members {
            self.add_member(team, *user, *role).await?;
        }
        Ok(())
    }
}

fn parse_hash<T>(raw: HashMap<String, String>, parse: fn(&str) -> T) -> HashMap<UserId, T> {
    raw.into_iter()
        .filter_map(|(user, value)| match user.parse::<UserId>() {
            Ok(id) => Some((id, parse(&value))),
            Err(_) => {
                warn!("Skipping cache field with invalid user id: {}", user);
                None
            }
        })
        .collect()
}
