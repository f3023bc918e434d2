//! JSON event envelopes for the team-activity and asset-change topics

use crate::access::AccessLevel;
use crate::error::{AclError, AclResult};
use crate::store::{TeamId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Team activity event types
///
/// Unrecognized names are kept so the consumer can log and skip them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TeamEventType {
    TeamCreated,
    MemberAdded,
    MemberRemoved,
    ManagerAdded,
    ManagerRemoved,
    Unknown(String),
}

impl TeamEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TeamCreated => "TEAM_CREATED",
            Self::MemberAdded => "MEMBER_ADDED",
            Self::MemberRemoved => "MEMBER_REMOVED",
            Self::ManagerAdded => "MANAGER_ADDED",
            Self::ManagerRemoved => "MANAGER_REMOVED",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for TeamEventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "TEAM_CREATED" => Self::TeamCreated,
            "MEMBER_ADDED" => Self::MemberAdded,
            "MEMBER_REMOVED" => Self::MemberRemoved,
            "MANAGER_ADDED" => Self::ManagerAdded,
            "MANAGER_REMOVED" => Self::ManagerRemoved,
            _ => Self::Unknown(s),
        }
    }
}

impl From<TeamEventType> for String {
    fn from(t: TeamEventType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TeamEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    Folder,
    Note,
}

impl AssetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "FOLDER",
            Self::Note => "NOTE",
        }
    }
}

/// What happened to an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetAction {
    Created,
    Updated,
    Deleted,
    Shared,
    Unshared,
}

impl AssetAction {
    fn suffix(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::Shared => "SHARED",
            Self::Unshared => "UNSHARED",
        }
    }
}

/// `<ASSET>_<ACTION>` event types, e.g. `FOLDER_SHARED`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetEventType {
    Known(AssetType, AssetAction),
    Unknown(String),
}

impl AssetEventType {
    pub fn new(asset: AssetType, action: AssetAction) -> Self {
        Self::Known(asset, action)
    }

    pub fn action(&self) -> Option<AssetAction> {
        match self {
            Self::Known(_, action) => Some(*action),
            Self::Unknown(_) => None,
        }
    }
}

impl From<String> for AssetEventType {
    fn from(s: String) -> Self {
        let parsed = s.split_once('_').and_then(|(asset, action)| {
            let asset = match asset {
                "FOLDER" => AssetType::Folder,
                "NOTE" => AssetType::Note,
                _ => return None,
            };
            let action = match action {
                "CREATED" => AssetAction::Created,
                "UPDATED" => AssetAction::Updated,
                "DELETED" => AssetAction::Deleted,
                "SHARED" => AssetAction::Shared,
                "UNSHARED" => AssetAction::Unshared,
                _ => return None,
            };
            Some((asset, action))
        });
        match parsed {
            Some((asset, action)) => Self::Known(asset, action),
            None => Self::Unknown(s),
        }
    }
}

impl From<AssetEventType> for String {
    fn from(t: AssetEventType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for AssetEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(asset, action) => write!(f, "{}_{}", asset.as_str(), action.suffix()),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

/// Envelope on the team-activity topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEvent {
    pub event_type: TeamEventType,
    pub team_id: TeamId,
    pub performed_by: UserId,
    pub target_user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl TeamEvent {
    pub fn new(
        event_type: TeamEventType,
        team_id: TeamId,
        performed_by: UserId,
        target_user_id: UserId,
    ) -> Self {
        Self {
            event_type,
            team_id,
            performed_by,
            target_user_id,
            timestamp: Utc::now(),
        }
    }

    /// Partition key
    pub fn key(&self) -> String {
        self.team_id.to_string()
    }
}

/// Envelope on the asset-change topic
///
/// `targetUserId` and `accessLevel` are present on share and unshare events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEvent {
    pub event_type: AssetEventType,
    pub asset_type: AssetType,
    pub asset_id: Uuid,
    pub owner_id: UserId,
    pub action_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessLevel>,
    pub timestamp: DateTime<Utc>,
}

impl AssetEvent {
    pub fn new(
        asset_type: AssetType,
        action: AssetAction,
        asset_id: Uuid,
        owner_id: UserId,
        action_by: UserId,
    ) -> Self {
        Self {
            event_type: AssetEventType::new(asset_type, action),
            asset_type,
            asset_id,
            owner_id,
            action_by,
            target_user_id: None,
            access_level: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_target(mut self, user: UserId) -> Self {
        self.target_user_id = Some(user);
        self
    }

    pub fn with_level(mut self, level: AccessLevel) -> Self {
        self.access_level = Some(level);
        self
    }

    pub fn key(&self) -> String {
        self.asset_id.to_string()
    }

    /// User an ACL change applies to; older envelopes carry only `ownerId`
    pub fn subject(&self) -> UserId {
        self.target_user_id.unwrap_or(self.owner_id)
    }
}

/// Decode a payload, reporting malformed JSON as a validation error
pub fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> AclResult<T> {
    serde_json::from_str(payload).map_err(|e| AclError::Validation(format!("malformed event: {}", e)))
}
