//! Event dispatch onto the derived projections
//!
//! Every operation is a hash set or hash delete, so applying an event twice
//! leaves the same state as applying it once.

use super::projection::{AssetAclCache, TeamMembershipCache};
use crate::access::{AccessLevel, TeamRole};
use crate::error::{AclError, AclResult};
use crate::events::{decode, AssetAction, AssetEvent, AssetEventType, TeamEvent, TeamEventType};
use async_trait::async_trait;
use tracing::{debug, warn};

/// What a handler did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Unknown event type, skipped
    Ignored,
}

/// Decodes and applies one topic's events
///
/// Malformed payloads come back as `Validation` errors, which the consumer
/// loop dead-letters without retrying.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &str) -> AclResult<Disposition>;
}

/// Handler for the asset-change topic
#[derive(Clone)]
pub struct AssetChangeHandler {
    acl: AssetAclCache,
}

impl AssetChangeHandler {
    pub fn new(acl: AssetAclCache) -> Self {
        Self { acl }
    }

    pub async fn apply(&self, event: &AssetEvent) -> AclResult<Disposition> {
        let action = match &event.event_type {
            AssetEventType::Known(_, action) => *action,
            AssetEventType::Unknown(name) => {
                warn!(asset_id = %event.asset_id, "Ignoring unknown asset event type {}", name);
                return Ok(Disposition::Ignored);
            }
        };

        let asset = event.asset_id;
        match action {
            AssetAction::Created => {
                self.acl
                    .set_access(asset, event.owner_id, AccessLevel::Owner)
                    .await?
            }
            AssetAction::Shared => {
                let level = event.access_level.ok_or_else(|| {
                    AclError::Validation(format!("{} without accessLevel", event.event_type))
                })?;
                if level == AccessLevel::None {
                    self.acl.remove_access(asset, event.subject()).await?
                } else {
                    self.acl.set_access(asset, event.subject(), level).await?
                }
            }
            AssetAction::Unshared => self.acl.remove_access(asset, event.subject()).await?,
            AssetAction::Deleted => match event.target_user_id {
                Some(user) => self.acl.remove_access(asset, user).await?,
                None => self.acl.drop_asset(asset).await?,
            },
            AssetAction::Updated => self.acl.touch(asset).await?,
        }

        debug!(asset_id = %asset, "Applied {}", event.event_type);
        Ok(Disposition::Applied)
    }
}

#[async_trait]
impl EventHandler for AssetChangeHandler {
    fn name(&self) -> &'static str {
        "asset-changes"
    }

    async fn handle(&self, payload: &str) -> AclResult<Disposition> {
        let event: AssetEvent = decode(payload)?;
        self.apply(&event).await
    }
}

/// Handler for the team-activity topic
#[derive(Clone)]
pub struct TeamActivityHandler {
    members: TeamMembershipCache,
}

impl TeamActivityHandler {
    pub fn new(members: TeamMembershipCache) -> Self {
        Self { members }
    }

    pub async fn apply(&self, event: &TeamEvent) -> AclResult<Disposition> {
        let team = event.team_id;
        match &event.event_type {
            TeamEventType::TeamCreated => {
                self.members
                    .add_member(team, event.performed_by, TeamRole::Owner)
                    .await?
            }
            TeamEventType::MemberAdded => {
                self.members
                    .add_member(team, event.target_user_id, TeamRole::Member)
                    .await?
            }
            TeamEventType::ManagerAdded => {
                self.members
                    .add_member(team, event.target_user_id, TeamRole::Manager)
                    .await?
            }
            TeamEventType::MemberRemoved | TeamEventType::ManagerRemoved => {
                self.members
                    .remove_member(team, event.target_user_id)
                    .await?
            }
            TeamEventType::Unknown(name) => {
                warn!(team_id = %team, "Ignoring unknown team event type {}", name);
                return Ok(Disposition::Ignored);
            }
        }

        debug!(team_id = %team, "Applied {}", event.event_type);
        Ok(Disposition::Applied)
    }
}

#[async_trait]
impl EventHandler for TeamActivityHandler {
    fn name(&self) -> &'static str {
        "team-activity"
    }

    async fn handle(&self, payload: &str) -> AclResult<Disposition> {
        let event: TeamEvent = decode(payload)?;
        self.apply(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys, CacheStore, MemoryCache};
    use crate::events::AssetType;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn asset_handler() -> (Arc<MemoryCache>, AssetChangeHandler, AssetAclCache) {
        let cache = Arc::new(MemoryCache::new());
        let acl = AssetAclCache::new(cache.clone(), Duration::from_secs(3600));
        (cache, AssetChangeHandler::new(acl.clone()), acl)
    }

    #[tokio::test]
    async fn note_shared_twice_is_idempotent() {
        let (cache, handler, acl) = asset_handler();
        let note = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let event = AssetEvent::new(AssetType::Note, AssetAction::Shared, note, owner, owner)
            .with_target(reader)
            .with_level(AccessLevel::Read);
        let payload = serde_json::to_string(&event).unwrap();

        handler.handle(&payload).await.unwrap();
        let once = cache.hgetall(&keys::asset_acl(note)).await.unwrap();
        handler.handle(&payload).await.unwrap();
        let twice = cache.hgetall(&keys::asset_acl(note)).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
        assert_eq!(
            acl.get_user_access(note, reader).await.unwrap(),
            Some(AccessLevel::Read)
        );
    }

    #[tokio::test]
    async fn asset_lifecycle() {
        let (_cache, handler, acl) = asset_handler();
        let folder = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let editor = Uuid::new_v4();

        let created = AssetEvent::new(AssetType::Folder, AssetAction::Created, folder, owner, owner);
        handler.apply(&created).await.unwrap();
        assert_eq!(
            acl.get_user_access(folder, owner).await.unwrap(),
            Some(AccessLevel::Owner)
        );

        let shared = AssetEvent::new(AssetType::Folder, AssetAction::Shared, folder, owner, owner)
            .with_target(editor)
            .with_level(AccessLevel::Write);
        handler.apply(&shared).await.unwrap();

        let unshared =
            AssetEvent::new(AssetType::Folder, AssetAction::Unshared, folder, owner, owner)
                .with_target(editor);
        handler.apply(&unshared).await.unwrap();
        assert_eq!(acl.get_user_access(folder, editor).await.unwrap(), None);

        let deleted = AssetEvent::new(AssetType::Folder, AssetAction::Deleted, folder, owner, owner);
        handler.apply(&deleted).await.unwrap();
        assert!(acl.get_asset_acl(folder).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn share_without_level_is_rejected() {
        let (_cache, handler, _acl) = asset_handler();
        let id = Uuid::new_v4();
        let event = AssetEvent::new(AssetType::Note, AssetAction::Shared, id, id, id);
        let err = handler.apply(&event).await.unwrap_err();
        assert!(matches!(err, AclError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_types_are_ignored() {
        let (cache, handler, _acl) = asset_handler();
        let payload = format!(
            r#"{{"eventType":"FOLDER_ARCHIVED","assetType":"FOLDER","assetId":"{id}","ownerId":"{id}","actionBy":"{id}","timestamp":"2024-01-01T00:00:00Z"}}"#,
            id = Uuid::new_v4()
        );
        assert_eq!(handler.handle(&payload).await.unwrap(), Disposition::Ignored);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_validation_error() {
        let (_cache, handler, _acl) = asset_handler();
        let err = handler.handle("{\"eventType\": 7}").await.unwrap_err();
        assert!(matches!(err, AclError::Validation(_)));
    }

    #[tokio::test]
    async fn team_activity_maintains_membership() {
        let cache = Arc::new(MemoryCache::new());
        let members = TeamMembershipCache::new(cache, Duration::from_secs(3600));
        let handler = TeamActivityHandler::new(members.clone());
        let team = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let manager = Uuid::new_v4();

        for event in [
            TeamEvent::new(TeamEventType::TeamCreated, team, owner, owner),
            TeamEvent::new(TeamEventType::ManagerAdded, team, owner, manager),
            TeamEvent::new(TeamEventType::ManagerAdded, team, owner, manager),
        ] {
            handler.apply(&event).await.unwrap();
        }
        let roster = members.members(team).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get(&owner), Some(&TeamRole::Owner));
        assert_eq!(roster.get(&manager), Some(&TeamRole::Manager));

        handler
            .apply(&TeamEvent::new(TeamEventType::ManagerRemoved, team, owner, manager))
            .await
            .unwrap();
        assert!(!members.is_member(team, manager).await.unwrap());
    }
}
