//! In-process ACL store
//!
//! Tables live behind a single `parking_lot::RwLock`. Uniqueness of
//! (team, user) and (resource, user) is checked inside the write lock, which
//! serializes concurrent inserts for the same pair the way a unique index
//! would.

use super::model::{
    Folder, FolderId, Note, NoteId, Roster, Share, ShareOutcome, Team, TeamId, UserId,
};
use super::repository::{FolderRepository, NoteRepository, TeamRepository, UserDirectory};
use crate::access::{AccessLevel, TeamRole};
use crate::error::{AclError, AclResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TeamRow {
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Share rows keyed by (resource, user)
#[derive(Debug, Default)]
struct ShareTable {
    rows: HashMap<(Uuid, UserId), Share>,
}

impl ShareTable {
    fn level(&self, resource: Uuid, user: UserId) -> AccessLevel {
        self.rows
            .get(&(resource, user))
            .map(|s| s.access)
            .unwrap_or_default()
    }

    fn owner(&self, resource: Uuid) -> Option<UserId> {
        self.rows
            .values()
            .find(|s| s.resource_id == resource && s.access == AccessLevel::Owner)
            .map(|s| s.user_id)
    }

    fn insert(&mut self, resource: Uuid, user: UserId, level: AccessLevel) -> AclResult<()> {
        if self.rows.contains_key(&(resource, user)) {
            return Err(AclError::Conflict(format!(
                "share for user {} on {} already exists",
                user, resource
            )));
        }
        self.rows
            .insert((resource, user), Share::new(resource, user, level));
        Ok(())
    }

    fn upsert(&mut self, resource: Uuid, user: UserId, level: AccessLevel) -> ShareOutcome {
        match self.rows.get_mut(&(resource, user)) {
            Some(row) => {
                let previous = row.access;
                row.access = level;
                row.updated_at = Utc::now();
                ShareOutcome::Changed { previous }
            }
            None => {
                self.rows
                    .insert((resource, user), Share::new(resource, user, level));
                ShareOutcome::Created
            }
        }
    }

    fn change(&mut self, resource: Uuid, user: UserId, level: AccessLevel) -> Option<AccessLevel> {
        let row = self.rows.get_mut(&(resource, user))?;
        let previous = row.access;
        row.access = level;
        row.updated_at = Utc::now();
        Some(previous)
    }

    fn remove(&mut self, resource: Uuid, user: UserId) -> Option<AccessLevel> {
        self.rows.remove(&(resource, user)).map(|s| s.access)
    }

    fn for_resource(&self, resource: Uuid) -> Vec<Share> {
        let mut shares: Vec<Share> = self
            .rows
            .values()
            .filter(|s| s.resource_id == resource)
            .cloned()
            .collect();
        shares.sort_by(|a, b| b.access.cmp(&a.access).then(a.created_at.cmp(&b.created_at)));
        shares
    }

    fn for_user(&self, user: UserId) -> impl Iterator<Item = &Share> {
        self.rows.values().filter(move |s| s.user_id == user)
    }

    fn purge(&mut self, resource: Uuid) {
        self.rows.retain(|(r, _), _| *r != resource);
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: HashSet<UserId>,
    teams: HashMap<TeamId, TeamRow>,
    rosters: HashMap<(TeamId, UserId), Roster>,
    folders: HashMap<FolderId, Folder>,
    folder_shares: ShareTable,
    notes: HashMap<NoteId, Note>,
    note_shares: ShareTable,
}

impl Tables {
    fn assemble_team(&self, id: TeamId) -> Option<Team> {
        let row = self.teams.get(&id)?;
        let mut rosters: Vec<Roster> = self
            .rosters
            .values()
            .filter(|r| r.team_id == id)
            .cloned()
            .collect();
        rosters.sort_by(|a, b| b.role.cmp(&a.role).then(a.created_at.cmp(&b.created_at)));
        Some(Team {
            id,
            name: row.name.clone(),
            rosters,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn require_team(&self, id: TeamId) -> AclResult<()> {
        if self.teams.contains_key(&id) {
            Ok(())
        } else {
            Err(AclError::not_found(format!("team {}", id)))
        }
    }

    fn require_folder(&self, id: FolderId) -> AclResult<&Folder> {
        self.folders
            .get(&id)
            .ok_or_else(|| AclError::not_found(format!("folder {}", id)))
    }

    fn require_note(&self, id: NoteId) -> AclResult<&Note> {
        self.notes
            .get(&id)
            .ok_or_else(|| AclError::not_found(format!("note {}", id)))
    }

    fn touch_team(&mut self, id: TeamId) {
        if let Some(row) = self.teams.get_mut(&id) {
            row.updated_at = Utc::now();
        }
    }
}

/// ACL store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryAclStore {
    tables: RwLock<Tables>,
}

impl MemoryAclStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user identity so it passes `UserDirectory::exists`
    pub fn add_user(&self, user: UserId) {
        self.tables.write().users.insert(user);
    }

    /// Register and return a fresh user id
    pub fn new_user(&self) -> UserId {
        let id = Uuid::new_v4();
        self.add_user(id);
        id
    }

    /// Number of share rows for a folder and user (0 or 1)
    pub fn folder_share_count(&self, folder: FolderId, user: UserId) -> usize {
        self.tables
            .read()
            .folder_shares
            .rows
            .values()
            .filter(|s| s.resource_id == folder && s.user_id == user)
            .count()
    }
}

#[async_trait]
impl UserDirectory for MemoryAclStore {
    async fn exists(&self, user: UserId) -> AclResult<bool> {
        Ok(self.tables.read().users.contains(&user))
    }
}

#[async_trait]
impl TeamRepository for MemoryAclStore {
    async fn create(&self, team: Team) -> AclResult<Team> {
        let mut tables = self.tables.write();
        if tables.teams.contains_key(&team.id) {
            return Err(AclError::Conflict(format!("team {} already exists", team.id)));
        }
        let owners = team
            .rosters
            .iter()
            .filter(|r| r.role == TeamRole::Owner)
            .count();
        if owners != 1 {
            return Err(AclError::Validation(format!(
                "team must have exactly one owner, got {}",
                owners
            )));
        }
        let mut seen = HashSet::new();
        for roster in &team.rosters {
            if !seen.insert(roster.user_id) {
                return Err(AclError::Conflict(format!(
                    "user {} appears twice in team roster",
                    roster.user_id
                )));
            }
        }

        tables.teams.insert(
            team.id,
            TeamRow {
                name: team.name.clone(),
                created_at: team.created_at,
                updated_at: team.updated_at,
            },
        );
        for roster in &team.rosters {
            let mut row = roster.clone();
            row.team_id = team.id;
            tables.rosters.insert((team.id, row.user_id), row);
        }
        debug!("Stored team {} with {} rosters", team.id, team.rosters.len());

        tables
            .assemble_team(team.id)
            .ok_or_else(|| AclError::Internal("team vanished after insert".to_string()))
    }

    async fn get_by_id(&self, id: TeamId) -> AclResult<Team> {
        self.tables
            .read()
            .assemble_team(id)
            .ok_or_else(|| AclError::not_found(format!("team {}", id)))
    }

    async fn exists(&self, id: TeamId) -> AclResult<bool> {
        Ok(self.tables.read().teams.contains_key(&id))
    }

    async fn list_for_user(&self, user: UserId) -> AclResult<Vec<Team>> {
        let tables = self.tables.read();
        let mut teams: Vec<Team> = tables
            .rosters
            .values()
            .filter(|r| r.user_id == user)
            .filter_map(|r| tables.assemble_team(r.team_id))
            .collect();
        teams.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(teams)
    }

    async fn list_ids(&self) -> AclResult<Vec<TeamId>> {
        Ok(self.tables.read().teams.keys().copied().collect())
    }

    async fn get_role(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        let tables = self.tables.read();
        tables.require_team(team)?;
        Ok(tables
            .rosters
            .get(&(team, user))
            .map(|r| r.role)
            .unwrap_or_default())
    }

    async fn add_members(&self, team: TeamId, users: &[UserId]) -> AclResult<()> {
        let mut tables = self.tables.write();
        tables.require_team(team)?;
        let mut seen = HashSet::new();
        for user in users {
            if !seen.insert(*user) || tables.rosters.contains_key(&(team, *user)) {
                return Err(AclError::Conflict(format!(
                    "user {} is already on team {}",
                    user, team
                )));
            }
        }
        for user in users {
            tables
                .rosters
                .insert((team, *user), Roster::new(team, *user, TeamRole::Member));
        }
        tables.touch_team(team);
        Ok(())
    }

    async fn add_manager(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        let mut tables = self.tables.write();
        tables.require_team(team)?;
        let previous = match tables.rosters.get_mut(&(team, user)) {
            Some(row) => {
                let previous = row.role;
                if previous.at_least(TeamRole::Manager) {
                    return Err(AclError::Conflict(format!(
                        "user {} is already {} of team {}",
                        user, previous, team
                    )));
                }
                row.role = TeamRole::Manager;
                row.updated_at = Utc::now();
                previous
            }
            None => {
                tables
                    .rosters
                    .insert((team, user), Roster::new(team, user, TeamRole::Manager));
                TeamRole::None
            }
        };
        tables.touch_team(team);
        Ok(previous)
    }

    async fn remove_member(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        let mut tables = self.tables.write();
        tables.require_team(team)?;
        let removed = tables
            .rosters
            .remove(&(team, user))
            .ok_or_else(|| AclError::not_found(format!("user {} on team {}", user, team)))?;
        tables.touch_team(team);
        Ok(removed.role)
    }

    async fn update(&self, team: &Team) -> AclResult<Team> {
        let mut tables = self.tables.write();
        let row = tables
            .teams
            .get_mut(&team.id)
            .ok_or_else(|| AclError::not_found(format!("team {}", team.id)))?;
        row.name = team.name.clone();
        row.updated_at = Utc::now();
        tables
            .assemble_team(team.id)
            .ok_or_else(|| AclError::Internal("team vanished after update".to_string()))
    }

    async fn delete(&self, id: TeamId) -> AclResult<Vec<UserId>> {
        let mut tables = self.tables.write();
        if tables.teams.remove(&id).is_none() {
            return Err(AclError::not_found(format!("team {}", id)));
        }
        let users: Vec<UserId> = tables
            .rosters
            .keys()
            .filter(|(t, _)| *t == id)
            .map(|(_, u)| *u)
            .collect();
        tables.rosters.retain(|(t, _), _| *t != id);
        Ok(users)
    }
}

#[async_trait]
impl FolderRepository for MemoryAclStore {
    async fn create(&self, folder: Folder, owner: UserId) -> AclResult<Folder> {
        let mut tables = self.tables.write();
        if tables.folders.contains_key(&folder.id) {
            return Err(AclError::Conflict(format!("folder {} already exists", folder.id)));
        }
        tables
            .folder_shares
            .insert(folder.id, owner, AccessLevel::Owner)?;
        tables.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn get_by_id(&self, id: FolderId) -> AclResult<Folder> {
        self.tables.read().require_folder(id).cloned()
    }

    async fn get_owner(&self, id: FolderId) -> AclResult<UserId> {
        let tables = self.tables.read();
        tables.require_folder(id)?;
        tables
            .folder_shares
            .owner(id)
            .ok_or_else(|| AclError::not_found(format!("owner of folder {}", id)))
    }

    async fn list_accessible(&self, user: UserId) -> AclResult<Vec<(Folder, AccessLevel)>> {
        let tables = self.tables.read();
        let mut folders: Vec<(Folder, AccessLevel)> = tables
            .folder_shares
            .for_user(user)
            .filter_map(|s| {
                tables
                    .folders
                    .get(&s.resource_id)
                    .map(|f| (f.clone(), s.access))
            })
            .collect();
        folders.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at));
        Ok(folders)
    }

    async fn list_ids(&self) -> AclResult<Vec<FolderId>> {
        Ok(self.tables.read().folders.keys().copied().collect())
    }

    async fn get_access_level(&self, id: FolderId, user: UserId) -> AclResult<AccessLevel> {
        Ok(self.tables.read().folder_shares.level(id, user))
    }

    async fn share(
        &self,
        id: FolderId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<ShareOutcome> {
        let mut tables = self.tables.write();
        tables.require_folder(id)?;
        Ok(tables.folder_shares.upsert(id, user, level))
    }

    async fn change_access_level(
        &self,
        id: FolderId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<AccessLevel> {
        let mut tables = self.tables.write();
        tables.require_folder(id)?;
        tables
            .folder_shares
            .change(id, user, level)
            .ok_or_else(|| AclError::not_found(format!("share for user {} on folder {}", user, id)))
    }

    async fn revoke_access(&self, id: FolderId, user: UserId) -> AclResult<AccessLevel> {
        let mut tables = self.tables.write();
        tables.require_folder(id)?;
        tables
            .folder_shares
            .remove(id, user)
            .ok_or_else(|| AclError::not_found(format!("share for user {} on folder {}", user, id)))
    }

    async fn list_shares(&self, id: FolderId) -> AclResult<Vec<Share>> {
        let tables = self.tables.read();
        tables.require_folder(id)?;
        Ok(tables.folder_shares.for_resource(id))
    }

    async fn update(&self, folder: &Folder) -> AclResult<Folder> {
        let mut tables = self.tables.write();
        let row = tables
            .folders
            .get_mut(&folder.id)
            .ok_or_else(|| AclError::not_found(format!("folder {}", folder.id)))?;
        row.name = folder.name.clone();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: FolderId) -> AclResult<Vec<NoteId>> {
        let mut tables = self.tables.write();
        if tables.folders.remove(&id).is_none() {
            return Err(AclError::not_found(format!("folder {}", id)));
        }
        tables.folder_shares.purge(id);
        let notes: Vec<NoteId> = tables
            .notes
            .values()
            .filter(|n| n.folder_id == id)
            .map(|n| n.id)
            .collect();
        for note in &notes {
            tables.notes.remove(note);
            tables.note_shares.purge(*note);
        }
        Ok(notes)
    }
}

#[async_trait]
impl NoteRepository for MemoryAclStore {
    async fn create(&self, note: Note, owner: UserId) -> AclResult<Note> {
        let mut tables = self.tables.write();
        tables.require_folder(note.folder_id)?;
        if tables.notes.contains_key(&note.id) {
            return Err(AclError::Conflict(format!("note {} already exists", note.id)));
        }
        tables
            .note_shares
            .insert(note.id, owner, AccessLevel::Owner)?;
        tables.notes.insert(note.id, note.clone());
        Ok(note)
    }

    async fn get_by_id(&self, id: NoteId) -> AclResult<Note> {
        self.tables.read().require_note(id).cloned()
    }

    async fn get_owner(&self, id: NoteId) -> AclResult<UserId> {
        let tables = self.tables.read();
        tables.require_note(id)?;
        tables
            .note_shares
            .owner(id)
            .ok_or_else(|| AclError::not_found(format!("owner of note {}", id)))
    }

    async fn list_by_folder(&self, folder: FolderId) -> AclResult<Vec<Note>> {
        let tables = self.tables.read();
        tables.require_folder(folder)?;
        let mut notes: Vec<Note> = tables
            .notes
            .values()
            .filter(|n| n.folder_id == folder)
            .cloned()
            .collect();
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(notes)
    }

    async fn list_accessible(&self, user: UserId) -> AclResult<Vec<(Note, AccessLevel)>> {
        let tables = self.tables.read();
        let mut notes: Vec<(Note, AccessLevel)> = tables
            .notes
            .values()
            .filter_map(|n| {
                let level = AccessLevel::max(
                    tables.note_shares.level(n.id, user),
                    tables.folder_shares.level(n.folder_id, user),
                );
                (level != AccessLevel::None).then(|| (n.clone(), level))
            })
            .collect();
        notes.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at));
        Ok(notes)
    }

    async fn list_ids(&self) -> AclResult<Vec<NoteId>> {
        Ok(self.tables.read().notes.keys().copied().collect())
    }

    async fn get_access_level(&self, id: NoteId, user: UserId) -> AclResult<AccessLevel> {
        Ok(self.tables.read().note_shares.level(id, user))
    }

    async fn get_folder_access_level(&self, id: NoteId, user: UserId) -> AclResult<AccessLevel> {
        let tables = self.tables.read();
        let note = tables.require_note(id)?;
        Ok(tables.folder_shares.level(note.folder_id, user))
    }

    async fn share(&self, id: NoteId, user: UserId, level: AccessLevel) -> AclResult<ShareOutcome> {
        let mut tables = self.tables.write();
        tables.require_note(id)?;
        Ok(tables.note_shares.upsert(id, user, level))
    }

    async fn change_access_level(
        &self,
        id: NoteId,
        user: UserId,
        level: AccessLevel,
    ) -> AclResult<AccessLevel> {
        let mut tables = self.tables.write();
        tables.require_note(id)?;
        tables
            .note_shares
            .change(id, user, level)
            .ok_or_else(|| AclError::not_found(format!("share for user {} on note {}", user, id)))
    }

    async fn revoke_access(&self, id: NoteId, user: UserId) -> AclResult<AccessLevel> {
        let mut tables = self.tables.write();
        tables.require_note(id)?;
        tables
            .note_shares
            .remove(id, user)
            .ok_or_else(|| AclError::not_found(format!("share for user {} on note {}", user, id)))
    }

    async fn list_shares(&self, id: NoteId) -> AclResult<Vec<Share>> {
        let tables = self.tables.read();
        tables.require_note(id)?;
        Ok(tables.note_shares.for_resource(id))
    }

    async fn update(&self, note: &Note) -> AclResult<Note> {
        let mut tables = self.tables.write();
        let row = tables
            .notes
            .get_mut(&note.id)
            .ok_or_else(|| AclError::not_found(format!("note {}", note.id)))?;
        row.title = note.title.clone();
        row.body = note.body.clone();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: NoteId) -> AclResult<()> {
        let mut tables = self.tables.write();
        if tables.notes.remove(&id).is_none() {
            return Err(AclError::not_found(format!("note {}", id)));
        }
        tables.note_shares.purge(id);
        Ok(())
    }
}
