//! Repository seams over the ACL store

use super::model::{
    Folder, FolderId, Note, NoteId, Share, ShareOutcome, Team, TeamId, UserId,
};
use crate::access::{AccessLevel, TeamRole};
use crate::error::AclResult;
use async_trait::async_trait;

/// Team and roster persistence
#[async_trait]
pub trait TeamRepository: Send + Sync {
    /// Insert a team together with its rosters
    ///
    /// Fails with `Conflict` when the id exists or a user appears twice.
    async fn create(&self, team: Team) -> AclResult<Team>;

    /// Team with its full roster, `NotFound` when absent
    async fn get_by_id(&self, id: TeamId) -> AclResult<Team>;

    async fn exists(&self, id: TeamId) -> AclResult<bool>;

    /// Teams the user has a roster entry in
    async fn list_for_user(&self, user: UserId) -> AclResult<Vec<Team>>;

    /// Every team id, for rebuilding derived caches
    async fn list_ids(&self) -> AclResult<Vec<TeamId>>;

    /// Role of a user in a team; no roster entry is `TeamRole::None`
    async fn get_role(&self, team: TeamId, user: UserId) -> AclResult<TeamRole>;

    /// Insert MEMBER rosters; any user already on the team is a `Conflict`
    async fn add_members(&self, team: TeamId, users: &[UserId]) -> AclResult<()>;

    /// Insert a MANAGER roster, or promote an existing MEMBER
    ///
    /// Returns the previous role.
    async fn add_manager(&self, team: TeamId, user: UserId) -> AclResult<TeamRole>;

    /// Delete a roster entry, returning the role it held
    async fn remove_member(&self, team: TeamId, user: UserId) -> AclResult<TeamRole>;

    /// Persist the team's mutable fields (name)
    async fn update(&self, team: &Team) -> AclResult<Team>;

    /// Delete a team and its rosters, returning the removed rosters' users
    async fn delete(&self, id: TeamId) -> AclResult<Vec<UserId>>;
}

/// Folder rows and folder shares
#[async_trait]
pub trait FolderRepository: Send + Sync {
    /// Insert a folder and its creator's OWNER share in one step
    async fn create(&self, folder: Folder, owner: UserId) -> AclResult<Folder>;

    async fn get_by_id(&self, id: FolderId) -> AclResult<Folder>;

    /// The user holding the OWNER share
    async fn get_owner(&self, id: FolderId) -> AclResult<UserId>;

    /// Folders with a share for `user`, paired with that share's level
    async fn list_accessible(&self, user: UserId) -> AclResult<Vec<(Folder, AccessLevel)>>;

    async fn list_ids(&self) -> AclResult<Vec<FolderId>>;

    /// Direct share level; no row is `AccessLevel::None`
    async fn get_access_level(&self, id: FolderId, user: UserId) -> AclResult<AccessLevel>;

    /// Upsert: update the row for (folder, user) if present, otherwise insert
    async fn share(&self, id: FolderId, user: UserId, level: AccessLevel)
        -> AclResult<ShareOutcome>;

    /// Update an existing row; `NotFound` if the user has no share
    async fn change_access_level(
        &self,
        id: FolderId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<AccessLevel>;

    /// Delete the row, returning the level it held
    async fn revoke_access(&self, id: FolderId, user: UserId) -> AclResult<AccessLevel>;

    async fn list_shares(&self, id: FolderId) -> AclResult<Vec<Share>>;

    async fn update(&self, folder: &Folder) -> AclResult<Folder>;

    /// Delete the folder, its shares, its notes and their shares
    ///
    /// Returns the ids of the notes removed with it.
    async fn delete(&self, id: FolderId) -> AclResult<Vec<NoteId>>;
}

/// Note rows and note shares
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Insert a note and its creator's OWNER share in one step
    async fn create(&self, note: Note, owner: UserId) -> AclResult<Note>;

    async fn get_by_id(&self, id: NoteId) -> AclResult<Note>;

    async fn get_owner(&self, id: NoteId) -> AclResult<UserId>;

    async fn list_by_folder(&self, folder: FolderId) -> AclResult<Vec<Note>>;

    /// Notes the user reaches through a note share or a parent folder share,
    /// paired with the effective level
    async fn list_accessible(&self, user: UserId) -> AclResult<Vec<(Note, AccessLevel)>>;

    async fn list_ids(&self) -> AclResult<Vec<NoteId>>;

    /// Direct note share level
    async fn get_access_level(&self, id: NoteId, user: UserId) -> AclResult<AccessLevel>;

    /// Share level on the note's parent folder
    async fn get_folder_access_level(&self, id: NoteId, user: UserId) -> AclResult<AccessLevel>;

    async fn share(&self, id: NoteId, user: UserId, level: AccessLevel) -> AclResult<ShareOutcome>;

    async fn change_access_level(
        &self,
        id: NoteId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<AccessLevel>;

    async fn revoke_access(&self, id: NoteId, user: UserId) -> AclResult<AccessLevel>;

    async fn list_shares(&self, id: NoteId) -> AclResult<Vec<Share>>;

    async fn update(&self, note: &Note) -> AclResult<Note>;

    async fn delete(&self, id: NoteId) -> AclResult<()>;
}

/// Lookup of known user identities
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user: UserId) -> AclResult<bool>;
}
