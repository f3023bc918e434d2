//! Manager views over team and user assets

use super::{Backend, Caller};
use crate::access::{AccessLevel, TeamRole};
use crate::error::{AclError, AclResult};
use crate::resolver::Authorizer;
use crate::store::{Note, TeamId, UserId};
use std::collections::HashSet;

#[derive(Clone)]
pub struct OverviewService {
    backend: Backend,
    auth: Authorizer,
}

impl OverviewService {
    pub fn new(backend: Backend) -> Self {
        let auth = backend.authorizer();
        Self { backend, auth }
    }

    /// Notes owned by any member of the team; caller must be a MANAGER
    pub async fn team_assets(&self, caller: &Caller, id: TeamId) -> AclResult<Vec<Note>> {
        let me = caller.user_id()?;
        let team = self.backend.teams.get_by_id(id).await?;
        self.auth
            .require_team_role(id, me, TeamRole::Manager, "viewing team assets")
            .await?;

        let mut seen = HashSet::new();
        let mut owned = Vec::new();
        for member in team.member_ids() {
            for (note, level) in self.backend.notes.list_accessible(member).await? {
                // Folder OWNER is inherited by every note inside it
                if level != AccessLevel::Owner || seen.contains(&note.id) {
                    continue;
                }
                if self.backend.notes.get_owner(note.id).await? == member {
                    seen.insert(note.id);
                    owned.push(note);
                }
            }
        }
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    /// Notes a user can reach
    ///
    /// Callers may look at themselves, or at anyone on a team they manage.
    pub async fn user_assets(&self, caller: &Caller, user: UserId) -> AclResult<Vec<Note>> {
        let me = caller.user_id()?;
        self.backend.ensure_user(user).await?;
        if me != user && !self.manages(me, user).await? {
            return Err(AclError::forbidden(format!(
                "not a manager of any team user {} belongs to",
                user
            )));
        }

        Ok(self
            .backend
            .notes
            .list_accessible(user)
            .await?
            .into_iter()
            .map(|(note, _)| note)
            .collect())
    }

    async fn manages(&self, manager: UserId, user: UserId) -> AclResult<bool> {
        let teams = self.backend.teams.list_for_user(manager).await?;
        Ok(teams.iter().any(|t| {
            t.role_of(manager).at_least(TeamRole::Manager) && t.role_of(user) != TeamRole::None
        }))
    }
}
