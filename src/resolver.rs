//! Authorization resolver
//!
//! Combines roster roles and resource shares into the effective permission
//! for a user, and turns failed comparisons into `Forbidden` errors.

use crate::access::{AccessLevel, TeamRole};
use crate::error::{AclError, AclResult};
use crate::store::{
    FolderId, FolderRepository, NoteId, NoteRepository, TeamId, TeamRepository, UserId,
};
use std::sync::Arc;
use tracing::debug;

/// Resolves effective roles and access levels
#[derive(Clone)]
pub struct Authorizer {
    teams: Arc<dyn TeamRepository>,
    folders: Arc<dyn FolderRepository>,
    notes: Arc<dyn NoteRepository>,
}

impl Authorizer {
    pub fn new(
        teams: Arc<dyn TeamRepository>,
        folders: Arc<dyn FolderRepository>,
        notes: Arc<dyn NoteRepository>,
    ) -> Self {
        Self {
            teams,
            folders,
            notes,
        }
    }

    /// Role of `user` in `team`; no roster entry is NONE
    pub async fn effective_team_role(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        self.teams.get_role(team, user).await
    }

    /// Folders do not inherit, so this is the direct share
    pub async fn folder_access(&self, folder: FolderId, user: UserId) -> AclResult<AccessLevel> {
        self.folders.get_access_level(folder, user).await
    }

    /// Higher of the direct note share and the parent folder share
    pub async fn note_access(&self, note: NoteId, user: UserId) -> AclResult<AccessLevel> {
        let inherited = self.notes.get_folder_access_level(note, user).await?;
        let direct = self.notes.get_access_level(note, user).await?;
        let effective = AccessLevel::max(direct, inherited);
        debug!(
            "note {} user {}: direct={} folder={} effective={}",
            note, user, direct, inherited, effective
        );
        Ok(effective)
    }

    /// Fail with `Forbidden` unless the user's team role reaches `threshold`
    pub async fn require_team_role(
        &self,
        team: TeamId,
        user: UserId,
        threshold: TeamRole,
        action: &str,
    ) -> AclResult<TeamRole> {
        let role = self.effective_team_role(team, user).await?;
        if role.at_least(threshold) {
            Ok(role)
        } else {
            Err(AclError::forbidden(format!(
                "{} requires {} role, caller has {}",
                action, threshold, role
            )))
        }
    }

    pub async fn require_folder_access(
        &self,
        folder: FolderId,
        user: UserId,
        threshold: AccessLevel,
        action: &str,
    ) -> AclResult<AccessLevel> {
        // Existence first so a missing folder reads as NotFound, not Forbidden
        self.folders.get_by_id(folder).await?;
        let level = self.folder_access(folder, user).await?;
        check_level(level, threshold, action)
    }

    pub async fn require_note_access(
        &self,
        note: NoteId,
        user: UserId,
        threshold: AccessLevel,
        action: &str,
    ) -> AclResult<AccessLevel> {
        let level = self.note_access(note, user).await?;
        check_level(level, threshold, action)
    }
}

fn check_level(level: AccessLevel, threshold: AccessLevel, action: &str) -> AclResult<AccessLevel> {
    if level.at_least(threshold) {
        Ok(level)
    } else {
        Err(AclError::forbidden(format!(
            "{} requires {} access, caller has {}",
            action, threshold, level
        )))
    }
}
