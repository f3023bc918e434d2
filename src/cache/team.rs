//! Cache-aside wrapper around a `TeamRepository`
//!
//! Reads go to `team:<id>` first and fall back to the store on any miss.
//! Roster writes hit the store, then patch the cached projection, then
//! delete it; the delete is what keeps readers correct. Update and delete
//! invalidate before writing.

use super::{bounded, keys, CacheStore};
use crate::access::TeamRole;
use crate::config::CacheConfig;
use crate::error::AclResult;
use crate::store::{Roster, Team, TeamId, TeamRepository, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cached team projection stored as JSON under `team:<id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTeam {
    pub id: TeamId,
    pub name: String,
    pub members: Vec<CachedMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMember {
    pub user_id: UserId,
    pub role: TeamRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Team> for CachedTeam {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            members: team
                .rosters
                .iter()
                .map(|r| CachedMember {
                    user_id: r.user_id,
                    role: r.role,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                })
                .collect(),
            created_at: team.created_at,
            updated_at: team.updated_at,
        }
    }
}

impl From<CachedTeam> for Team {
    fn from(cached: CachedTeam) -> Self {
        let id = cached.id;
        Self {
            id,
            name: cached.name,
            rosters: cached
                .members
                .into_iter()
                .map(|m| Roster {
                    team_id: id,
                    user_id: m.user_id,
                    role: m.role,
                    created_at: m.created_at,
                    updated_at: m.updated_at,
                })
                .collect(),
            created_at: cached.created_at,
            updated_at: cached.updated_at,
        }
    }
}

impl CachedTeam {
    fn upsert_member(&mut self, user: UserId, role: TeamRole) {
        let now = Utc::now();
        match self.members.iter_mut().find(|m| m.user_id == user) {
            Some(member) => {
                member.role = role;
                member.updated_at = now;
            }
            None => self.members.push(CachedMember {
                user_id: user,
                role,
                created_at: now,
                updated_at: now,
            }),
        }
    }

    fn remove_member(&mut self, user: UserId) {
        self.members.retain(|m| m.user_id != user);
    }
}

/// Team repository with a read-through, write-invalidate cache
pub struct CachedTeamRepository {
    inner: Arc<dyn TeamRepository>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    op_timeout: Duration,
}

impl CachedTeamRepository {
    pub fn new(
        inner: Arc<dyn TeamRepository>,
        cache: Arc<dyn CacheStore>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            inner,
            cache,
            ttl: config.team_ttl(),
            op_timeout: config.op_timeout(),
        }
    }

    async fn read_cached(&self, id: TeamId) -> Option<CachedTeam> {
        let key = keys::team(id);
        match bounded(self.op_timeout, "get", self.cache.get(&key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedTeam>(&raw) {
                Ok(team) => Some(team),
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    self.invalidate(id).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Team cache read failed for {}, using store: {}", key, e);
                None
            }
        }
    }

    async fn write_cached(&self, team: &CachedTeam) {
        let key = keys::team(team.id);
        let raw = match serde_json::to_string(team) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not encode team {} for cache: {}", team.id, e);
                return;
            }
        };
        if let Err(e) = bounded(
            self.op_timeout,
            "set",
            self.cache.set_ex(&key, &raw, self.ttl),
        )
        .await
        {
            warn!("Team cache write failed for {}: {}", key, e);
        }
    }

    async fn invalidate(&self, id: TeamId) {
        let key = keys::team(id);
        match bounded(self.op_timeout, "del", self.cache.del(&key)).await {
            Ok(_) => debug!("Invalidated {}", key),
            Err(e) => warn!("Team cache invalidation failed for {}: {}", key, e),
        }
    }

    /// Apply a change to the cached projection if one is present
    async fn patch(&self, id: TeamId, change: impl FnOnce(&mut CachedTeam) + Send) {
        if let Some(mut cached) = self.read_cached(id).await {
            change(&mut cached);
            self.write_cached(&cached).await;
        }
    }
}

#[async_trait]
impl TeamRepository for CachedTeamRepository {
    async fn create(&self, team: Team) -> AclResult<Team> {
        let created = self.inner.create(team).await?;
        self.write_cached(&CachedTeam::from(&created)).await;
        Ok(created)
    }

    async fn get_by_id(&self, id: TeamId) -> AclResult<Team> {
        if let Some(cached) = self.read_cached(id).await {
            debug!("Team cache hit: {}", id);
            return Ok(cached.into());
        }

        debug!("Team cache miss: {}", id);
        let team = self.inner.get_by_id(id).await?;
        self.write_cached(&CachedTeam::from(&team)).await;
        Ok(team)
    }

    async fn exists(&self, id: TeamId) -> AclResult<bool> {
        self.inner.exists(id).await
    }

    async fn list_for_user(&self, user: UserId) -> AclResult<Vec<Team>> {
        self.inner.list_for_user(user).await
    }

    async fn list_ids(&self) -> AclResult<Vec<TeamId>> {
        self.inner.list_ids().await
    }

    async fn get_role(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        self.inner.get_role(team, user).await
    }

    async fn add_members(&self, team: TeamId, users: &[UserId]) -> AclResult<()> {
        self.inner.add_members(team, users).await?;
        let added = users.to_vec();
        self.patch(team, move |cached| {
            for user in added {
                cached.upsert_member(user, TeamRole::Member);
            }
        })
        .await;
        self.invalidate(team).await;
        Ok(())
    }

    async fn add_manager(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        let previous = self.inner.add_manager(team, user).await?;
        self.patch(team, move |cached| cached.upsert_member(user, TeamRole::Manager))
            .await;
        self.invalidate(team).await;
        Ok(previous)
    }

    async fn remove_member(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
        let removed = self.inner.remove_member(team, user).await?;
        self.patch(team, move |cached| cached.remove_member(user))
            .await;
        self.invalidate(team).await;
        Ok(removed)
    }

    async fn update(&self, team: &Team) -> AclResult<Team> {
        self.invalidate(team.id).await;
        self.inner.update(team).await
    }

    async fn delete(&self, id: TeamId) -> AclResult<Vec<UserId>> {
        self.invalidate(id).await;
        self.inner.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryAclStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Delegates to the memory store and counts `get_by_id` calls
    struct CountingTeams {
        store: MemoryAclStore,
        reads: AtomicUsize,
    }

    impl CountingTeams {
        fn new() -> Self {
            Self {
                store: MemoryAclStore::new(),
                reads: AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TeamRepository for CountingTeams {
        async fn create(&self, team: Team) -> AclResult<Team> {
            TeamRepository::create(&self.store, team).await
        }
        async fn get_by_id(&self, id: TeamId) -> AclResult<Team> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            TeamRepository::get_by_id(&self.store, id).await
        }
        async fn exists(&self, id: TeamId) -> AclResult<bool> {
            TeamRepository::exists(&self.store, id).await
        }
        async fn list_for_user(&self, user: UserId) -> AclResult<Vec<Team>> {
            self.store.list_for_user(user).await
        }
        async fn list_ids(&self) -> AclResult<Vec<TeamId>> {
            TeamRepository::list_ids(&self.store).await
        }
        async fn get_role(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
            self.store.get_role(team, user).await
        }
        async fn add_members(&self, team: TeamId, users: &[UserId]) -> AclResult<()> {
            self.store.add_members(team, users).await
        }
        async fn add_manager(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
            self.store.add_manager(team, user).await
        }
        async fn remove_member(&self, team: TeamId, user: UserId) -> AclResult<TeamRole> {
            self.store.remove_member(team, user).await
        }
        async fn update(&self, team: &Team) -> AclResult<Team> {
            TeamRepository::update(&self.store, team).await
        }
        async fn delete(&self, id: TeamId) -> AclResult<Vec<UserId>> {
            TeamRepository::delete(&self.store, id).await
        }
    }

    fn setup() -> (Arc<CountingTeams>, Arc<MemoryCache>, CachedTeamRepository) {
        let inner = Arc::new(CountingTeams::new());
        let cache = Arc::new(MemoryCache::new());
        let repo = CachedTeamRepository::new(inner.clone(), cache.clone(), &CacheConfig::default());
        (inner, cache, repo)
    }

    async fn seed(inner: &CountingTeams) -> (Team, UserId) {
        let owner = Uuid::new_v4();
        let team = inner.create(Team::new("core", owner)).await.unwrap();
        (team, owner)
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (inner, _cache, repo) = setup();
        let (team, _) = seed(&inner).await;

        let first = repo.get_by_id(team.id).await.unwrap();
        let second = repo.get_by_id(team.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.reads(), 1);
    }

    #[tokio::test]
    async fn write_replaces_stale_entry() {
        let (inner, cache, repo) = setup();
        let (team, _) = seed(&inner).await;
        let newcomer = Uuid::new_v4();

        // Stale projection planted just before the write
        let stale = CachedTeam::from(&team);
        cache
            .set_ex(
                &keys::team(team.id),
                &serde_json::to_string(&stale).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        repo.add_members(team.id, &[newcomer]).await.unwrap();

        let fresh = repo.get_by_id(team.id).await.unwrap();
        assert_eq!(fresh.role_of(newcomer), TeamRole::Member);
        assert_eq!(inner.reads(), 1);
    }

    #[tokio::test]
    async fn remove_member_is_visible_on_next_read() {
        let (inner, _cache, repo) = setup();
        let (team, _) = seed(&inner).await;
        let member = Uuid::new_v4();
        repo.add_members(team.id, &[member]).await.unwrap();
        assert_eq!(repo.get_by_id(team.id).await.unwrap().role_of(member), TeamRole::Member);

        repo.remove_member(team.id, member).await.unwrap();
        assert_eq!(repo.get_by_id(team.id).await.unwrap().role_of(member), TeamRole::None);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_store() {
        let (inner, cache, repo) = setup();
        let (team, owner) = seed(&inner).await;
        cache.set_unavailable(true);

        let loaded = repo.get_by_id(team.id).await.unwrap();
        assert_eq!(loaded.role_of(owner), TeamRole::Owner);
        repo.add_manager(team.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(inner.reads(), 1);
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let (inner, cache, repo) = setup();
        let (team, _) = seed(&inner).await;
        cache
            .set_ex(&keys::team(team.id), "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        let loaded = repo.get_by_id(team.id).await.unwrap();
        assert_eq!(loaded.id, team.id);
        assert_eq!(inner.reads(), 1);
    }

    #[tokio::test]
    async fn delete_invalidates_first() {
        let (inner, cache, repo) = setup();
        let (team, _) = seed(&inner).await;
        repo.get_by_id(team.id).await.unwrap();
        assert!(cache.get(&keys::team(team.id)).await.unwrap().is_some());

        repo.delete(team.id).await.unwrap();
        assert!(cache.get(&keys::team(team.id)).await.unwrap().is_none());
        assert!(repo.get_by_id(team.id).await.is_err());
    }
}
