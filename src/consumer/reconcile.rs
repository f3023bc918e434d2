//! Rebuild the derived projections from the ACL store
//!
//! The projections only ever see events, so a lost or dead-lettered event
//! leaves them stale until the next rebuild. Rebuilds read the store
//! directly and replace whole keys.

use super::projection::{AssetAclCache, TeamMembershipCache};
use crate::error::{AclError, AclResult};
use crate::store::{FolderId, FolderRepository, NoteId, NoteRepository, TeamId, TeamRepository};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counts from one full rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub teams: usize,
    pub folders: usize,
    pub notes: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    teams: Arc<dyn TeamRepository>,
    folders: Arc<dyn FolderRepository>,
    notes: Arc<dyn NoteRepository>,
    acl: AssetAclCache,
    members: TeamMembershipCache,
}

impl Reconciler {
    pub fn new(
        teams: Arc<dyn TeamRepository>,
        folders: Arc<dyn FolderRepository>,
        notes: Arc<dyn NoteRepository>,
        acl: AssetAclCache,
        members: TeamMembershipCache,
    ) -> Self {
        Self {
            teams,
            folders,
            notes,
            acl,
            members,
        }
    }

    pub async fn rebuild_team(&self, id: TeamId) -> AclResult<()> {
        let roster: Vec<_> = match self.teams.get_by_id(id).await {
            Ok(team) => team.rosters.iter().map(|r| (r.user_id, r.role)).collect(),
            Err(AclError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.members.replace(id, &roster).await
    }

    pub async fn rebuild_folder(&self, id: FolderId) -> AclResult<()> {
        let grants: Vec<_> = match self.folders.list_shares(id).await {
            Ok(shares) => shares.iter().map(|s| (s.user_id, s.access)).collect(),
            Err(AclError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.acl.replace(id, &grants).await
    }

    /// Direct note shares only; folder inheritance is resolved at read time
    pub async fn rebuild_note(&self, id: NoteId) -> AclResult<()> {
        let grants: Vec<_> = match self.notes.list_shares(id).await {
            Ok(shares) => shares.iter().map(|s| (s.user_id, s.access)).collect(),
            Err(AclError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.acl.replace(id, &grants).await
    }

    /// Rebuild every team, folder and note the store knows about
    ///
    /// A failing key is logged and counted; the pass carries on.
    pub async fn rebuild_all(&self) -> AclResult<ResyncReport> {
        let mut report = ResyncReport::default();

        for id in self.teams.list_ids().await? {
            match self.rebuild_team(id).await {
                Ok(()) => report.teams += 1,
                Err(e) => {
                    warn!(team_id = %id, "Team rebuild failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        for id in self.folders.list_ids().await? {
            match self.rebuild_folder(id).await {
                Ok(()) => report.folders += 1,
                Err(e) => {
                    warn!(folder_id = %id, "Folder rebuild failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        for id in self.notes.list_ids().await? {
            match self.rebuild_note(id).await {
                Ok(()) => report.notes += 1,
                Err(e) => {
                    warn!(note_id = %id, "Note rebuild failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            teams = report.teams,
            folders = report.folders,
            notes = report.notes,
            failed = report.failed,
            "Resync complete"
        );
        Ok(report)
    }

    /// Rebuild everything every `interval` until cancelled
    pub async fn run_periodic(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.rebuild_all().await {
                        warn!("Resync failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessLevel, TeamRole};
    use crate::cache::MemoryCache;
    use crate::store::{Folder, MemoryAclStore, Note, Team};

    fn setup() -> (Arc<MemoryAclStore>, Reconciler, AssetAclCache, TeamMembershipCache) {
        let store = Arc::new(MemoryAclStore::new());
        let cache = Arc::new(MemoryCache::new());
        let acl = AssetAclCache::new(cache.clone(), Duration::from_secs(60));
        let members = TeamMembershipCache::new(cache, Duration::from_secs(60));
        let reconciler = Reconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            acl.clone(),
            members.clone(),
        );
        (store, reconciler, acl, members)
    }

    #[tokio::test]
    async fn rebuild_all_matches_store() {
        let (store, reconciler, acl, members) = setup();
        let owner = store.new_user();
        let reader = store.new_user();

        let team = TeamRepository::create(store.as_ref(), Team::new("core", owner))
            .await
            .unwrap();
        let folder = FolderRepository::create(store.as_ref(), Folder::new("docs"), owner)
            .await
            .unwrap();
        FolderRepository::share(store.as_ref(), folder.id, reader, AccessLevel::Read)
            .await
            .unwrap();
        let note = NoteRepository::create(store.as_ref(), Note::new(folder.id, "a", "b"), owner)
            .await
            .unwrap();

        // Stale entry that no event will ever clear
        acl.set_access(folder.id, store.new_user(), AccessLevel::Write)
            .await
            .unwrap();

        let report = reconciler.rebuild_all().await.unwrap();
        assert_eq!((report.teams, report.folders, report.notes), (1, 1, 1));

        let folder_acl = acl.get_asset_acl(folder.id).await.unwrap();
        assert_eq!(folder_acl.len(), 2);
        assert_eq!(folder_acl.get(&reader), Some(&AccessLevel::Read));
        assert_eq!(
            acl.get_asset_acl(note.id).await.unwrap().get(&owner),
            Some(&AccessLevel::Owner)
        );
        assert_eq!(
            members.role(team.id, owner).await.unwrap(),
            Some(TeamRole::Owner)
        );
    }

    #[tokio::test]
    async fn missing_rows_clear_the_projection() {
        let (_store, reconciler, acl, members) = setup();
        let ghost = uuid::Uuid::new_v4();
        let user = uuid::Uuid::new_v4();
        acl.set_access(ghost, user, AccessLevel::Read).await.unwrap();
        members.add_member(ghost, user, TeamRole::Member).await.unwrap();

        reconciler.rebuild_folder(ghost).await.unwrap();
        reconciler.rebuild_team(ghost).await.unwrap();
        assert!(acl.get_asset_acl(ghost).await.unwrap().is_empty());
        assert!(members.members(ghost).await.unwrap().is_empty());
    }
}
