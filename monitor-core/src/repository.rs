//! Storage seams for monitors, groups, teams and users, with in-memory
//! implementations used for tests and the `memory` storage backend.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{MonitorGroup, Team, User};
use crate::monitor::Monitor;
use crate::{Error, Result};

#[async_trait]
pub trait MonitorRepository: Send + Sync {
    /// Fails with a conflict when the id is taken.
    async fn insert(&self, monitor: Monitor) -> Result<Monitor>;
    async fn get(&self, id: &str) -> Result<Option<Monitor>>;
    async fn list_by_team(&self, team_id: &str) -> Result<Vec<Monitor>>;
    async fn list_all(&self) -> Result<Vec<Monitor>>;
    /// Replaces the stored monitor with the same id.
    async fn update(&self, monitor: Monitor) -> Result<Monitor>;
    async fn delete(&self, id: &str) -> Result<Monitor>;
    /// Removes every monitor of the team and returns them.
    async fn delete_by_team(&self, team_id: &str) -> Result<Vec<Monitor>>;
}

/// Groups are keyed by team and id; the same group id may exist in
/// several teams.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn insert(&self, group: MonitorGroup) -> Result<MonitorGroup>;
    async fn get(&self, team_id: &str, id: &str) -> Result<Option<MonitorGroup>>;
    async fn list_by_team(&self, team_id: &str) -> Result<Vec<MonitorGroup>>;
    async fn update(&self, group: MonitorGroup) -> Result<MonitorGroup>;
    async fn delete(&self, team_id: &str, id: &str) -> Result<MonitorGroup>;
    async fn delete_by_team(&self, team_id: &str) -> Result<usize>;
}

#[async_trait]
pub trait TeamRepository: Send + Sync {
    async fn insert(&self, team: Team) -> Result<Team>;
    async fn get(&self, id: &str) -> Result<Option<Team>>;
    async fn list_for_member(&self, username: &str) -> Result<Vec<Team>>;
    async fn update(&self, team: Team) -> Result<Team>;
    async fn delete(&self, id: &str) -> Result<Team>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: User) -> Result<User>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;
}

#[derive(Debug, Default)]
pub struct InMemoryMonitorRepository {
    monitors: RwLock<HashMap<String, Monitor>>,
}

impl InMemoryMonitorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_id(mut monitors: Vec<Monitor>) -> Vec<Monitor> {
    monitors.sort_by(|a, b| a.id.cmp(&b.id));
    monitors
}

#[async_trait]
impl MonitorRepository for InMemoryMonitorRepository {
    async fn insert(&self, monitor: Monitor) -> Result<Monitor> {
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&monitor.id) {
            return Err(Error::conflict(format!(
                "monitor {} already exists",
                monitor.id
            )));
        }
        monitors.insert(monitor.id.clone(), monitor.clone());
        Ok(monitor)
    }

    async fn get(&self, id: &str) -> Result<Option<Monitor>> {
        Ok(self.monitors.read().await.get(id).cloned())
    }

    async fn list_by_team(&self, team_id: &str) -> Result<Vec<Monitor>> {
        let monitors = self.monitors.read().await;
        Ok(sorted_by_id(
            monitors
                .values()
                .filter(|monitor| monitor.team_id == team_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self) -> Result<Vec<Monitor>> {
        Ok(sorted_by_id(
            self.monitors.read().await.values().cloned().collect(),
        ))
    }

    async fn update(&self, monitor: Monitor) -> Result<Monitor> {
        let mut monitors = self.monitors.write().await;
        let slot = monitors
            .get_mut(&monitor.id)
            .ok_or_else(|| Error::not_found(format!("monitor {} not found", monitor.id)))?;
        *slot = monitor.clone();
        Ok(monitor)
    }

    async fn delete(&self, id: &str) -> Result<Monitor> {
        self.monitors
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("monitor {id} not found")))
    }

    async fn delete_by_team(&self, team_id: &str) -> Result<Vec<Monitor>> {
        let mut monitors = self.monitors.write().await;
        let ids: Vec<String> = monitors
            .values()
            .filter(|monitor| monitor.team_id == team_id)
            .map(|monitor| monitor.id.clone())
            .collect();
        Ok(sorted_by_id(
            ids.iter().filter_map(|id| monitors.remove(id)).collect(),
        ))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<(String, String), MonitorGroup>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn group_key(team_id: &str, id: &str) -> (String, String) {
    (team_id.to_string(), id.to_string())
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn insert(&self, group: MonitorGroup) -> Result<MonitorGroup> {
        let mut groups = self.groups.write().await;
        let key = group_key(&group.team_id, &group.id);
        if groups.contains_key(&key) {
            return Err(Error::conflict(format!(
                "monitor group {} already exists in team {}",
                group.id, group.team_id
            )));
        }
        groups.insert(key, group.clone());
        Ok(group)
    }

    async fn get(&self, team_id: &str, id: &str) -> Result<Option<MonitorGroup>> {
        Ok(self.groups.read().await.get(&group_key(team_id, id)).cloned())
    }

    async fn list_by_team(&self, team_id: &str) -> Result<Vec<MonitorGroup>> {
        let mut groups: Vec<MonitorGroup> = self
            .groups
            .read()
            .await
            .values()
            .filter(|group| group.team_id == team_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }

    async fn update(&self, group: MonitorGroup) -> Result<MonitorGroup> {
        let mut groups = self.groups.write().await;
        let slot = groups
            .get_mut(&group_key(&group.team_id, &group.id))
            .ok_or_else(|| Error::not_found(format!("monitor group {} not found", group.id)))?;
        *slot = group.clone();
        Ok(group)
    }

    async fn delete(&self, team_id: &str, id: &str) -> Result<MonitorGroup> {
        self.groups
            .write()
            .await
            .remove(&group_key(team_id, id))
            .ok_or_else(|| Error::not_found(format!("monitor group {id} not found in team {team_id}")))
    }

    async fn delete_by_team(&self, team_id: &str) -> Result<usize> {
        let mut groups = self.groups.write().await;
        let before = groups.len();
        groups.retain(|(team, _), _| team != team_id);
        Ok(before - groups.len())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTeamRepository {
    teams: RwLock<HashMap<String, Team>>,
}

impl InMemoryTeamRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeamRepository for InMemoryTeamRepository {
    async fn insert(&self, team: Team) -> Result<Team> {
        let mut teams = self.teams.write().await;
        if teams.contains_key(&team.id) {
            return Err(Error::conflict(format!("team {} already exists", team.id)));
        }
        teams.insert(team.id.clone(), team.clone());
        Ok(team)
    }

    async fn get(&self, id: &str) -> Result<Option<Team>> {
        Ok(self.teams.read().await.get(id).cloned())
    }

    async fn list_for_member(&self, username: &str) -> Result<Vec<Team>> {
        let mut teams: Vec<Team> = self
            .teams
            .read()
            .await
            .values()
            .filter(|team| team.is_member(username))
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(teams)
    }

    async fn update(&self, team: Team) -> Result<Team> {
        let mut teams = self.teams.write().await;
        let slot = teams
            .get_mut(&team.id)
            .ok_or_else(|| Error::not_found(format!("team {} not found", team.id)))?;
        *slot = team.clone();
        Ok(team)
    }

    async fn delete(&self, id: &str) -> Result<Team> {
        self.teams
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("team {id} not found")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, user: User) -> Result<User> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.username) {
            return Err(Error::conflict(format!(
                "user {} already exists",
                user.username
            )));
        }
        users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::fixtures::{http_monitor, ping_monitor};

    #[tokio::test]
    async fn monitor_crud() {
        let repo = InMemoryMonitorRepository::new();
        let monitor = http_monitor();

        repo.insert(monitor.clone()).await.unwrap();
        assert!(matches!(
            repo.insert(monitor.clone()).await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(repo.get(&monitor.id).await.unwrap(), Some(monitor.clone()));

        let mut edited = monitor.clone();
        edited.description = "edited".to_string();
        repo.update(edited.clone()).await.unwrap();
        assert_eq!(repo.get(&monitor.id).await.unwrap(), Some(edited));

        repo.delete(&monitor.id).await.unwrap();
        assert_eq!(repo.get(&monitor.id).await.unwrap(), None);
        assert!(matches!(
            repo.delete(&monitor.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(repo.update(monitor).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn monitors_are_listed_per_team() {
        let repo = InMemoryMonitorRepository::new();
        repo.insert(http_monitor()).await.unwrap();
        repo.insert(ping_monitor().with_team("edge")).await.unwrap();

        let core = repo.list_by_team("core").await.unwrap();
        assert_eq!(core.len(), 1);
        assert_eq!(core[0].id, "api-health");
        assert_eq!(repo.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn team_monitors_are_deleted_together() {
        let repo = InMemoryMonitorRepository::new();
        repo.insert(http_monitor()).await.unwrap();
        repo.insert(ping_monitor()).await.unwrap();
        let mut elsewhere = ping_monitor().with_team("edge");
        elsewhere.id = "edge-only".to_string();
        repo.insert(elsewhere).await.unwrap();

        let removed = repo.delete_by_team("core").await.unwrap();

        let ids: Vec<_> = removed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["api-health", "edge-ping"]);
        assert!(repo.list_by_team("core").await.unwrap().is_empty());
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn groups_are_scoped_by_team() {
        let repo = InMemoryGroupRepository::new();
        repo.insert(MonitorGroup::new("Edge", "", "core").unwrap())
            .await
            .unwrap();
        repo.insert(MonitorGroup::new("Edge", "", "ops").unwrap())
            .await
            .unwrap();
        assert!(matches!(
            repo.insert(MonitorGroup::new("edge", "", "core").unwrap()).await,
            Err(Error::Conflict(_))
        ));

        assert!(repo.get("core", "edge").await.unwrap().is_some());
        assert!(repo.get("core", "db").await.unwrap().is_none());

        let mut renamed = repo.get("ops", "edge").await.unwrap().unwrap();
        renamed.rename("Edge PoPs", "").unwrap();
        repo.update(renamed).await.unwrap();
        assert_eq!(repo.list_by_team("ops").await.unwrap()[0].name, "Edge PoPs");

        repo.delete("core", "edge").await.unwrap();
        assert!(matches!(
            repo.delete("core", "edge").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(repo.delete_by_team("ops").await.unwrap(), 1);
        assert!(repo.list_by_team("ops").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn teams_are_listed_for_members() {
        let repo = InMemoryTeamRepository::new();
        repo.insert(Team::new("Ops", "", "alice").unwrap()).await.unwrap();
        repo.insert(Team::new("Dev", "", "bob").unwrap()).await.unwrap();

        let teams = repo.list_for_member("alice").await.unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].id, "ops");
        assert!(matches!(
            repo.insert(Team::new("ops", "", "carol").unwrap()).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let repo = InMemoryUserRepository::new();
        repo.insert(User::new("alice", "h".to_string())).await.unwrap();

        assert!(matches!(
            repo.insert(User::new("alice", "h2".to_string())).await,
            Err(Error::Conflict(_))
        ));
        assert!(repo.get_by_username("alice").await.unwrap().is_some());
        assert!(repo.get_by_username("bob").await.unwrap().is_none());
    }
}
