use std::sync::Arc;
use tracing::warn;

use crate::models::Team;
use crate::permission::{Permission, PermissionResolver};
use crate::{Error, Result};

/// Decides whether a team member may perform an action within their team.
#[derive(Debug, Clone)]
pub struct Authorizer {
    resolver: Arc<PermissionResolver>,
}

impl Authorizer {
    pub fn new(resolver: Arc<PermissionResolver>) -> Self {
        Self { resolver }
    }

    /// Grants the action iff `username` belongs to `team` and their role
    /// covers every permission in `permissions`.
    pub fn authorize_team_action(
        &self,
        team: &Team,
        username: &str,
        permissions: &[Permission],
    ) -> Result<()> {
        let role = team.member_role(username).ok_or_else(|| {
            Error::forbidden(format!("user {username} is not a member of team {}", team.id))
        })?;

        if !self.resolver.role_satisfies(role, permissions) {
            let requested: Vec<&str> = permissions.iter().map(|p| p.id).collect();
            warn!(team = %team.id, %username, %role, ?requested, "permission denied");
            return Err(Error::forbidden(format!(
                "role {role} in team {} does not grant {}",
                team.id,
                requested.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for Authorizer {
    fn default() -> Self {
        Self::new(Arc::new(PermissionResolver::builtin().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{MONITOR_ADMIN, MONITOR_EDITOR, MONITOR_READER, Role, TEAM_ADMIN};

    fn team() -> Team {
        let mut team = Team::new("Ops", "", "alice").unwrap();
        team.add_member("bob", Role::Member).unwrap();
        team.add_member("carol", Role::Viewer).unwrap();
        team
    }

    #[test]
    fn members_are_checked_against_their_role() {
        let authz = Authorizer::default();
        let team = team();

        assert!(authz.authorize_team_action(&team, "alice", &[TEAM_ADMIN]).is_ok());
        assert!(authz.authorize_team_action(&team, "bob", &[MONITOR_EDITOR]).is_ok());
        assert!(matches!(
            authz.authorize_team_action(&team, "bob", &[MONITOR_ADMIN]),
            Err(Error::Forbidden(_))
        ));
        assert!(authz.authorize_team_action(&team, "carol", &[MONITOR_READER]).is_ok());
    }

    #[test]
    fn outsiders_are_forbidden() {
        let err = Authorizer::default()
            .authorize_team_action(&team(), "mallory", &[MONITOR_READER])
            .unwrap_err();
        assert!(err.to_string().contains("not a member"));
    }

    #[test]
    fn empty_request_is_forbidden() {
        assert!(Authorizer::default()
            .authorize_team_action(&team(), "alice", &[])
            .is_err());
    }
}
