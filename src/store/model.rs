//! Rows of the ACL store

use crate::access::{AccessLevel, TeamRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type TeamId = Uuid;
pub type FolderId = Uuid;
pub type NoteId = Uuid;

/// A team with its roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub rosters: Vec<Roster>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// New team whose only roster entry is `owner` as OWNER
    pub fn new(name: impl Into<String>, owner: UserId) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            rosters: vec![Roster::new(id, owner, TeamRole::Owner)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Role of `user`; absence means NONE
    pub fn role_of(&self, user: UserId) -> TeamRole {
        self.rosters
            .iter()
            .find(|r| r.user_id == user)
            .map(|r| r.role)
            .unwrap_or(TeamRole::None)
    }

    pub fn owner(&self) -> Option<UserId> {
        self.rosters
            .iter()
            .find(|r| r.role == TeamRole::Owner)
            .map(|r| r.user_id)
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.rosters.iter().map(|r| r.user_id).collect()
    }
}

/// Membership of one user in one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role: TeamRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Roster {
    pub fn new(team_id: TeamId, user_id: UserId, role: TeamRole) -> Self {
        let now = Utc::now();
        Self {
            team_id,
            user_id,
            role,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub body: String,
    pub folder_id: FolderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(folder_id: FolderId, title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            folder_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One (resource, user, level) grant. Used for both folders and notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub resource_id: Uuid,
    pub user_id: UserId,
    pub access: AccessLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Share {
    pub fn new(resource_id: Uuid, user_id: UserId, access: AccessLevel) -> Self {
        let now = Utc::now();
        Self {
            resource_id,
            user_id,
            access,
            created_at: now,
            updated_at: now,
        }
    }
}

pub type FolderShare = Share;
pub type NoteShare = Share;

/// Which branch a share upsert took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    /// No prior row; one was inserted
    Created,
    /// An existing row's level was replaced
    Changed { previous: AccessLevel },
}
