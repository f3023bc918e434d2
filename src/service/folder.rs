//! Folders and folder shares

use super::{Backend, Caller};
use crate::access::AccessLevel;
use crate::error::{AclError, AclResult};
use crate::events::{AssetAction, AssetEvent, AssetType};
use crate::resolver::Authorizer;
use crate::store::{Folder, FolderId, Share, ShareOutcome, UserId};
use tracing::{debug, info};

#[derive(Clone)]
pub struct FolderService {
    backend: Backend,
    auth: Authorizer,
}

impl FolderService {
    pub fn new(backend: Backend) -> Self {
        let auth = backend.authorizer();
        Self { backend, auth }
    }

    /// Create a folder owned by the caller
    pub async fn create(&self, caller: &Caller, name: &str) -> AclResult<Folder> {
        let me = caller.user_id()?;
        let name = validate_name(name)?;

        let folder = self.backend.folders.create(Folder::new(name), me).await?;
        info!(folder_id = %folder.id, "Folder created");
        self.emit(AssetEvent::new(
            AssetType::Folder,
            AssetAction::Created,
            folder.id,
            me,
            me,
        ))
        .await;
        Ok(folder)
    }

    /// Folder metadata for a caller with at least READ
    pub async fn get(&self, caller: &Caller, id: FolderId) -> AclResult<Folder> {
        let me = caller.user_id()?;
        let folder = self.load(id).await?;
        let level = self.auth.folder_access(id, me).await?;
        if !level.at_least(AccessLevel::Read) {
            return Err(AclError::forbidden(format!("no access to folder {}", id)));
        }
        Ok(folder)
    }

    /// Folders shared with the caller, with the caller's level on each
    pub async fn list_accessible(&self, caller: &Caller) -> AclResult<Vec<(Folder, AccessLevel)>> {
        let me = caller.user_id()?;
        self.backend.folders.list_accessible(me).await
    }

    /// Share rows of a folder the caller can read
    pub async fn list_shares(&self, caller: &Caller, id: FolderId) -> AclResult<Vec<Share>> {
        let me = caller.user_id()?;
        self.auth
            .require_folder_access(id, me, AccessLevel::Read, "listing folder shares")
            .await?;
        self.backend.folders.list_shares(id).await
    }

    pub async fn update(&self, caller: &Caller, id: FolderId, name: &str) -> AclResult<Folder> {
        let me = caller.user_id()?;
        self.auth
            .require_folder_access(id, me, AccessLevel::Write, "updating the folder")
            .await?;
        let mut folder = self.backend.folders.get_by_id(id).await?;
        folder.name = validate_name(name)?.to_string();

        let folder = self.backend.folders.update(&folder).await?;
        self.invalidate(id).await;
        let owner = self.backend.folders.get_owner(id).await?;
        self.emit(AssetEvent::new(
            AssetType::Folder,
            AssetAction::Updated,
            id,
            owner,
            me,
        ))
        .await;
        Ok(folder)
    }

    /// Delete the folder with its notes
    ///
    /// Emits `FOLDER_DELETED` and a `NOTE_DELETED` for every note removed
    /// with it.
    pub async fn delete(&self, caller: &Caller, id: FolderId) -> AclResult<()> {
        let me = caller.user_id()?;
        self.auth
            .require_folder_access(id, me, AccessLevel::Owner, "deleting the folder")
            .await?;

        let notes = self.backend.folders.delete(id).await?;
        self.invalidate(id).await;
        info!(folder_id = %id, notes = notes.len(), "Folder deleted");

        self.emit(AssetEvent::new(
            AssetType::Folder,
            AssetAction::Deleted,
            id,
            me,
            me,
        ))
        .await;
        for note in notes {
            if let Some(metadata) = &self.backend.metadata {
                metadata.invalidate_note(note).await;
            }
            self.emit(AssetEvent::new(
                AssetType::Note,
                AssetAction::Deleted,
                note,
                me,
                me,
            ))
            .await;
        }
        Ok(())
    }

    /// Grant or change a user's level on the folder
    ///
    /// OWNER cannot be granted and NONE is not a grant; use `revoke`.
    pub async fn share(
        &self,
        caller: &Caller,
        id: FolderId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<ShareOutcome> {
        let me = caller.user_id()?;
        validate_grant(level)?;
        self.auth
            .require_folder_access(id, me, AccessLevel::Owner, "sharing the folder")
            .await?;
        self.backend.ensure_user(user).await?;
        let owner = self.backend.folders.get_owner(id).await?;
        if user == owner {
            return Err(AclError::forbidden("cannot change the owner's access".to_string()));
        }

        let outcome = self.backend.folders.share(id, user, level).await?;
        debug!(folder_id = %id, user_id = %user, level = %level, ?outcome, "Folder shared");
        self.invalidate(id).await;
        self.emit(
            AssetEvent::new(AssetType::Folder, AssetAction::Shared, id, owner, me)
                .with_target(user)
                .with_level(level),
        )
        .await;
        Ok(outcome)
    }

    /// Remove a user's share, returning the level it held
    pub async fn revoke(&self, caller: &Caller, id: FolderId, user: UserId) -> AclResult<AccessLevel> {
        let me = caller.user_id()?;
        self.auth
            .require_folder_access(id, me, AccessLevel::Owner, "revoking folder access")
            .await?;
        let owner = self.backend.folders.get_owner(id).await?;
        if user == owner {
            return Err(AclError::forbidden("cannot revoke the owner's access".to_string()));
        }

        let previous = self.backend.folders.revoke_access(id, user).await?;
        self.invalidate(id).await;
        self.emit(
            AssetEvent::new(AssetType::Folder, AssetAction::Unshared, id, owner, me)
                .with_target(user),
        )
        .await;
        Ok(previous)
    }

    /// Metadata cache, then store
    async fn load(&self, id: FolderId) -> AclResult<Folder> {
        if let Some(metadata) = &self.backend.metadata {
            if let Some(folder) = metadata.folder(id).await {
                return Ok(folder);
            }
            let folder = self.backend.folders.get_by_id(id).await?;
            metadata.put_folder(&folder).await;
            return Ok(folder);
        }
        self.backend.folders.get_by_id(id).await
    }

    async fn invalidate(&self, id: FolderId) {
        if let Some(metadata) = &self.backend.metadata {
            metadata.invalidate_folder(id).await;
        }
    }

    async fn emit(&self, event: AssetEvent) {
        self.backend.publisher.publish_asset(&event).await;
    }
}

fn validate_name(name: &str) -> AclResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AclError::Validation("folder name must not be empty".to_string()));
    }
    Ok(name)
}

/// Levels a share may grant
pub(super) fn validate_grant(level: AccessLevel) -> AclResult<()> {
    match level {
        AccessLevel::Read | AccessLevel::Write => Ok(()),
        AccessLevel::Owner => Err(AclError::Validation(
            "ownership is only conferred at creation".to_string(),
        )),
        AccessLevel::None => Err(AclError::Validation(
            "sharing NONE is not a grant; revoke instead".to_string(),
        )),
    }
}
