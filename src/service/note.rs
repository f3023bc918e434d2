//! Notes and note shares
//!
//! Every check here uses the effective level: the higher of the note's own
//! share and the share on its folder.

use super::folder::validate_grant;
use super::{Backend, Caller};
use crate::access::AccessLevel;
use crate::error::{AclError, AclResult};
use crate::events::{AssetAction, AssetEvent, AssetType};
use crate::resolver::Authorizer;
use crate::store::{FolderId, Note, NoteId, Share, ShareOutcome, UserId};
use tracing::{debug, info};

#[derive(Clone)]
pub struct NoteService {
    backend: Backend,
    auth: Authorizer,
}

impl NoteService {
    pub fn new(backend: Backend) -> Self {
        let auth = backend.authorizer();
        Self { backend, auth }
    }

    /// Create a note in a folder the caller can write to
    pub async fn create(
        &self,
        caller: &Caller,
        folder: FolderId,
        title: &str,
        body: &str,
    ) -> AclResult<Note> {
        let me = caller.user_id()?;
        let title = title.trim();
        if title.is_empty() {
            return Err(AclError::Validation("note title must not be empty".to_string()));
        }
        self.auth
            .require_folder_access(folder, me, AccessLevel::Write, "creating notes in the folder")
            .await?;

        let note = self
            .backend
            .notes
            .create(Note::new(folder, title, body), me)
            .await?;
        info!(note_id = %note.id, folder_id = %folder, "Note created");
        self.emit(AssetEvent::new(
            AssetType::Note,
            AssetAction::Created,
            note.id,
            me,
            me,
        ))
        .await;
        Ok(note)
    }

    pub async fn get(&self, caller: &Caller, id: NoteId) -> AclResult<Note> {
        let me = caller.user_id()?;
        let note = self.load(id).await?;
        self.auth
            .require_note_access(id, me, AccessLevel::Read, "reading the note")
            .await?;
        Ok(note)
    }

    /// Notes in a folder the caller can read
    pub async fn list_in_folder(&self, caller: &Caller, folder: FolderId) -> AclResult<Vec<Note>> {
        let me = caller.user_id()?;
        self.auth
            .require_folder_access(folder, me, AccessLevel::Read, "listing the folder")
            .await?;
        self.backend.notes.list_by_folder(folder).await
    }

    /// Notes reachable by the caller, with the effective level on each
    pub async fn list_accessible(&self, caller: &Caller) -> AclResult<Vec<(Note, AccessLevel)>> {
        let me = caller.user_id()?;
        self.backend.notes.list_accessible(me).await
    }

    pub async fn list_shares(&self, caller: &Caller, id: NoteId) -> AclResult<Vec<Share>> {
        let me = caller.user_id()?;
        self.auth
            .require_note_access(id, me, AccessLevel::Read, "listing note shares")
            .await?;
        self.backend.notes.list_shares(id).await
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: NoteId,
        title: &str,
        body: &str,
    ) -> AclResult<Note> {
        let me = caller.user_id()?;
        self.auth
            .require_note_access(id, me, AccessLevel::Write, "updating the note")
            .await?;
        let mut note = self.backend.notes.get_by_id(id).await?;
        let title = title.trim();
        if title.is_empty() {
            return Err(AclError::Validation("note title must not be empty".to_string()));
        }
        note.title = title.to_string();
        note.body = body.to_string();

        let note = self.backend.notes.update(&note).await?;
        self.invalidate(id).await;
        let owner = self.backend.notes.get_owner(id).await?;
        self.emit(AssetEvent::new(
            AssetType::Note,
            AssetAction::Updated,
            id,
            owner,
            me,
        ))
        .await;
        Ok(note)
    }

    pub async fn delete(&self, caller: &Caller, id: NoteId) -> AclResult<()> {
        let me = caller.user_id()?;
        self.auth
            .require_note_access(id, me, AccessLevel::Owner, "deleting the note")
            .await?;
        let owner = self.backend.notes.get_owner(id).await?;

        self.backend.notes.delete(id).await?;
        self.invalidate(id).await;
        info!(note_id = %id, "Note deleted");
        self.emit(AssetEvent::new(
            AssetType::Note,
            AssetAction::Deleted,
            id,
            owner,
            me,
        ))
        .await;
        Ok(())
    }

    /// Grant or change a user's level on the note
    pub async fn share(
        &self,
        caller: &Caller,
        id: NoteId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<ShareOutcome> {
        let me = caller.user_id()?;
        validate_grant(level)?;
        self.auth
            .require_note_access(id, me, AccessLevel::Owner, "sharing the note")
            .await?;
        self.backend.ensure_user(user).await?;
        let owner = self.backend.notes.get_owner(id).await?;
        if user == owner {
            return Err(AclError::forbidden("cannot change the owner's access".to_string()));
        }

        let outcome = self.backend.notes.share(id, user, level).await?;
        debug!(note_id = %id, user_id = %user, level = %level, ?outcome, "Note shared");
        self.invalidate(id).await;
        self.emit(
            AssetEvent::new(AssetType::Note, AssetAction::Shared, id, owner, me)
                .with_target(user)
                .with_level(level),
        )
        .await;
        Ok(outcome)
    }

    /// Remove a user's direct share; a folder share still applies afterwards
    pub async fn revoke(&self, caller: &Caller, id: NoteId, user: UserId) -> AclResult<AccessLevel> {
        let me = caller.user_id()?;
        self.auth
            .require_note_access(id, me, AccessLevel::Owner, "revoking note access")
            .await?;
        let owner = self.backend.notes.get_owner(id).await?;
        if user == owner {
            return Err(AclError::forbidden("cannot revoke the owner's access".to_string()));
        }

        let previous = self.backend.notes.revoke_access(id, user).await?;
        self.invalidate(id).await;
        self.emit(
            AssetEvent::new(AssetType::Note, AssetAction::Unshared, id, owner, me)
                .with_target(user),
        )
        .await;
        Ok(previous)
    }

    async fn load(&self, id: NoteId) -> AclResult<Note> {
        if let Some(metadata) = &self.backend.metadata {
            if let Some(note) = metadata.note(id).await {
                return Ok(note);
            }
            let note = self.backend.notes.get_by_id(id).await?;
            metadata.put_note(&note).await;
            return Ok(note);
        }
        self.backend.notes.get_by_id(id).await
    }

    async fn invalidate(&self, id: NoteId) {
        if let Some(metadata) = &self.backend.metadata {
            metadata.invalidate_note(id).await;
        }
    }

    async fn emit(&self, event: AssetEvent) {
        self.backend.publisher.publish_asset(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;

    #[tokio::test]
    async fn folder_share_grants_note_access() {
        let h = Harness::new();
        let owner = h.store.new_user();
        let reader = h.store.new_user();
        let caller = Caller::new(owner);
        let folder = h.services.folders.create(&caller, "docs").await.unwrap();
        let note = h
            .services
            .notes
            .create(&caller, folder.id, "plan", "body")
            .await
            .unwrap();

        let err = h
            .services
            .notes
            .get(&Caller::new(reader), note.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::Forbidden(_)));

        h.services
            .folders
            .share(&caller, folder.id, reader, AccessLevel::Read)
            .await
            .unwrap();
        let seen = h
            .services
            .notes
            .get(&Caller::new(reader), note.id)
            .await
            .unwrap();
        assert_eq!(seen.title, "plan");

        let err = h
            .services
            .notes
            .update(&Caller::new(reader), note.id, "mine", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::Forbidden(_)));
    }

    #[tokio::test]
    async fn note_share_lifts_above_folder_share() {
        let h = Harness::new();
        let owner = h.store.new_user();
        let editor = h.store.new_user();
        let caller = Caller::new(owner);
        let folder = h.services.folders.create(&caller, "docs").await.unwrap();
        let note = h
            .services
            .notes
            .create(&caller, folder.id, "plan", "")
            .await
            .unwrap();
        h.services
            .folders
            .share(&caller, folder.id, editor, AccessLevel::Read)
            .await
            .unwrap();
        h.services
            .notes
            .share(&caller, note.id, editor, AccessLevel::Write)
            .await
            .unwrap();

        let updated = h
            .services
            .notes
            .update(&Caller::new(editor), note.id, "plan v2", "more")
            .await
            .unwrap();
        assert_eq!(updated.title, "plan v2");

        let level = h
            .services
            .notes
            .revoke(&caller, note.id, editor)
            .await
            .unwrap();
        assert_eq!(level, AccessLevel::Write);
        // Folder READ still applies
        h.services
            .notes
            .get(&Caller::new(editor), note.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_requires_folder_write() {
        let h = Harness::new();
        let owner = h.store.new_user();
        let reader = h.store.new_user();
        let caller = Caller::new(owner);
        let folder = h.services.folders.create(&caller, "docs").await.unwrap();
        h.services
            .folders
            .share(&caller, folder.id, reader, AccessLevel::Read)
            .await
            .unwrap();

        let err = h
            .services
            .notes
            .create(&Caller::new(reader), folder.id, "x", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::Forbidden(_)));

        let err = h
            .services
            .notes
            .create(&caller, uuid::Uuid::new_v4(), "x", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::NotFound(_)));
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let h = Harness::new();
        let err = h
            .services
            .notes
            .list_accessible(&Caller::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, AclError::Unauthorized));
    }
}
