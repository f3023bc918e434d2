//! Application services
//!
//! Every mutating operation follows the same order: authorize the caller,
//! write the store, then hand events to the publisher. Nothing is published
//! for a write that failed.

mod folder;
mod note;
mod overview;
mod team;

pub use folder::FolderService;
pub use note::NoteService;
pub use overview::OverviewService;
pub use team::TeamService;

use crate::cache::{CacheStore, CachedTeamRepository, MetadataCache};
use crate::config::CacheConfig;
use crate::error::{AclError, AclResult};
use crate::events::EventPublisher;
use crate::resolver::Authorizer;
use crate::store::{FolderRepository, NoteRepository, TeamRepository, UserDirectory, UserId};
use std::sync::Arc;

/// Identity of whoever is calling a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    user: Option<UserId>,
}

impl Caller {
    pub fn new(user: UserId) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }

    /// Authenticated user id, or `Unauthorized`
    pub fn user_id(&self) -> AclResult<UserId> {
        self.user.ok_or(AclError::Unauthorized)
    }
}

/// Repositories, caches and publisher the services share
#[derive(Clone)]
pub struct Backend {
    pub teams: Arc<dyn TeamRepository>,
    pub folders: Arc<dyn FolderRepository>,
    pub notes: Arc<dyn NoteRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub metadata: Option<MetadataCache>,
    pub publisher: EventPublisher,
}

impl Backend {
    /// All four repositories served by one store
    pub fn from_store<S>(store: Arc<S>, publisher: EventPublisher) -> Self
    where
        S: TeamRepository + FolderRepository + NoteRepository + UserDirectory + 'static,
    {
        Self {
            teams: store.clone(),
            folders: store.clone(),
            notes: store.clone(),
            users: store,
            metadata: None,
            publisher,
        }
    }

    /// Put the cache-aside repository in front of the team store
    pub fn with_team_cache(mut self, cache: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        self.teams = Arc::new(CachedTeamRepository::new(self.teams, cache, config));
        self
    }

    pub fn with_metadata_cache(mut self, metadata: MetadataCache) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn authorizer(&self) -> Authorizer {
        Authorizer::new(self.teams.clone(), self.folders.clone(), self.notes.clone())
    }

    /// `NotFound` unless the user directory knows `user`
    async fn ensure_user(&self, user: UserId) -> AclResult<()> {
        if self.users.exists(user).await? {
            Ok(())
        } else {
            Err(AclError::not_found(format!("user {}", user)))
        }
    }
}

/// The four services over one backend
#[derive(Clone)]
pub struct Services {
    pub teams: TeamService,
    pub folders: FolderService,
    pub notes: NoteService,
    pub overview: OverviewService,
}

impl Services {
    pub fn new(backend: Backend) -> Self {
        Self {
            teams: TeamService::new(backend.clone()),
            folders: FolderService::new(backend.clone()),
            notes: NoteService::new(backend.clone()),
            overview: OverviewService::new(backend),
        }
    }
}
