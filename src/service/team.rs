//! Team lifecycle and roster management

use super::{Backend, Caller};
use crate::access::TeamRole;
use crate::error::{AclError, AclResult};
use crate::events::{TeamEvent, TeamEventType};
use crate::resolver::Authorizer;
use crate::store::{Roster, Team, TeamId, UserId};
use std::collections::HashSet;
use tracing::info;

#[derive(Clone)]
pub struct TeamService {
    backend: Backend,
    auth: Authorizer,
}

impl TeamService {
    pub fn new(backend: Backend) -> Self {
        let auth = backend.authorizer();
        Self { backend, auth }
    }

    /// Create a team owned by the caller
    ///
    /// Managers are added before members and a user listed twice keeps the
    /// first role. Emits `TEAM_CREATED`, then one `MANAGER_ADDED` or
    /// `MEMBER_ADDED` per added user.
    pub async fn create(
        &self,
        caller: &Caller,
        name: &str,
        managers: &[UserId],
        members: &[UserId],
    ) -> AclResult<Team> {
        let me = caller.user_id()?;
        let name = validate_name(name)?;

        let mut team = Team::new(name, me);
        let mut seen = HashSet::from([me]);
        let mut added = Vec::new();
        let wanted = managers
            .iter()
            .map(|u| (*u, TeamRole::Manager))
            .chain(members.iter().map(|u| (*u, TeamRole::Member)));
        for (user, role) in wanted {
            if !seen.insert(user) {
                continue;
            }
            self.backend.ensure_user(user).await?;
            team.rosters.push(Roster::new(team.id, user, role));
            added.push((user, role));
        }

        let team = self.backend.teams.create(team).await?;
        info!(team_id = %team.id, rosters = team.rosters.len(), "Team created");

        self.emit(TeamEventType::TeamCreated, team.id, me, me).await;
        for (user, role) in added {
            let kind = if role == TeamRole::Manager {
                TeamEventType::ManagerAdded
            } else {
                TeamEventType::MemberAdded
            };
            self.emit(kind, team.id, me, user).await;
        }
        Ok(team)
    }

    /// Team with roster; any roster entry may read it
    pub async fn get(&self, caller: &Caller, id: TeamId) -> AclResult<Team> {
        let me = caller.user_id()?;
        let team = self.backend.teams.get_by_id(id).await?;
        if !team.role_of(me).at_least(TeamRole::Member) {
            return Err(AclError::forbidden(format!("not a member of team {}", id)));
        }
        Ok(team)
    }

    /// Teams the caller belongs to
    pub async fn list_mine(&self, caller: &Caller) -> AclResult<Vec<Team>> {
        let me = caller.user_id()?;
        self.backend.teams.list_for_user(me).await
    }

    /// Add users as MEMBER; users already on the team are skipped
    pub async fn add_members(
        &self,
        caller: &Caller,
        id: TeamId,
        users: &[UserId],
    ) -> AclResult<Team> {
        let me = caller.user_id()?;
        let team = self
            .load_requiring(id, me, TeamRole::Manager, "adding members")
            .await?;

        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for user in users {
            if !seen.insert(*user) || team.role_of(*user) != TeamRole::None {
                continue;
            }
            self.backend.ensure_user(*user).await?;
            fresh.push(*user);
        }
        if fresh.is_empty() {
            return Ok(team);
        }

        self.backend.teams.add_members(id, &fresh).await?;
        info!(team_id = %id, added = fresh.len(), "Members added");
        for user in fresh {
            self.emit(TeamEventType::MemberAdded, id, me, user).await;
        }
        self.backend.teams.get_by_id(id).await
    }

    /// Add a MANAGER, promoting an existing MEMBER
    pub async fn add_manager(&self, caller: &Caller, id: TeamId, user: UserId) -> AclResult<Team> {
        let me = caller.user_id()?;
        self.load_requiring(id, me, TeamRole::Manager, "adding managers")
            .await?;
        self.backend.ensure_user(user).await?;

        let previous = self.backend.teams.add_manager(id, user).await?;
        info!(team_id = %id, user_id = %user, previous = %previous, "Manager added");
        self.emit(TeamEventType::ManagerAdded, id, me, user).await;
        self.backend.teams.get_by_id(id).await
    }

    /// Remove a roster entry
    ///
    /// MEMBERs may only remove themselves and the OWNER cannot be removed.
    pub async fn remove_member(&self, caller: &Caller, id: TeamId, user: UserId) -> AclResult<()> {
        let me = caller.user_id()?;
        let team = self.backend.teams.get_by_id(id).await?;
        match team.role_of(me) {
            TeamRole::None => {
                return Err(AclError::forbidden(format!("not a member of team {}", id)));
            }
            TeamRole::Member if user != me => {
                return Err(AclError::forbidden(
                    "members can only remove themselves".to_string(),
                ));
            }
            _ => {}
        }
        match team.role_of(user) {
            TeamRole::Owner => {
                return Err(AclError::forbidden("cannot remove the team owner".to_string()));
            }
            TeamRole::None => {
                return Err(AclError::not_found(format!("user {} on team {}", user, id)));
            }
            _ => {}
        }

        self.backend.teams.remove_member(id, user).await?;
        info!(team_id = %id, user_id = %user, "Member removed");
        self.emit(TeamEventType::MemberRemoved, id, me, user).await;
        Ok(())
    }

    /// OWNER-only removal of a manager (or any non-owner roster entry)
    pub async fn remove_manager(&self, caller: &Caller, id: TeamId, user: UserId) -> AclResult<()> {
        let me = caller.user_id()?;
        let team = self
            .load_requiring(id, me, TeamRole::Owner, "removing managers")
            .await?;
        match team.role_of(user) {
            TeamRole::Owner => {
                return Err(AclError::forbidden("cannot remove the team owner".to_string()));
            }
            TeamRole::None => {
                return Err(AclError::not_found(format!("user {} on team {}", user, id)));
            }
            _ => {}
        }

        self.backend.teams.remove_member(id, user).await?;
        info!(team_id = %id, user_id = %user, "Manager removed");
        self.emit(TeamEventType::ManagerRemoved, id, me, user).await;
        Ok(())
    }

    pub async fn rename(&self, caller: &Caller, id: TeamId, name: &str) -> AclResult<Team> {
        let me = caller.user_id()?;
        let mut team = self
            .load_requiring(id, me, TeamRole::Manager, "renaming the team")
            .await?;
        team.name = validate_name(name)?.to_string();
        self.backend.teams.update(&team).await
    }

    /// Delete the team; every removed roster entry gets a `MEMBER_REMOVED`
    pub async fn delete(&self, caller: &Caller, id: TeamId) -> AclResult<()> {
        let me = caller.user_id()?;
        self.load_requiring(id, me, TeamRole::Owner, "deleting the team")
            .await?;

        let removed = self.backend.teams.delete(id).await?;
        info!(team_id = %id, rosters = removed.len(), "Team deleted");
        for user in removed {
            self.emit(TeamEventType::MemberRemoved, id, me, user).await;
        }
        Ok(())
    }

    /// Load the team (`NotFound` first) and check the caller's role
    async fn load_requiring(
        &self,
        id: TeamId,
        me: UserId,
        threshold: TeamRole,
        action: &str,
    ) -> AclResult<Team> {
        let team = self.backend.teams.get_by_id(id).await?;
        self.auth.require_team_role(id, me, threshold, action).await?;
        Ok(team)
    }

    async fn emit(&self, kind: TeamEventType, team: TeamId, by: UserId, target: UserId) {
        self.backend
            .publisher
            .publish_team(&TeamEvent::new(kind, team, by, target))
            .await;
    }
}

fn validate_name(name: &str) -> AclResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AclError::Validation("team name must not be empty".to_string()));
    }
    Ok(name)
}
