//! Use cases combining storage, authorization, check execution and event
//! publication. The HTTP API is a thin layer over these services.

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::AuthService;
use crate::authz::Authorizer;
use crate::broadcast::{Broadcaster, SubscriberId, Subscription};
use crate::models::{MonitorGroup, Team, User};
use crate::monitor::{CheckEngine, Monitor, MonitorEvent, MonitorRegistry, MonitorResponse};
use crate::permission::{
    MONITOR_ADMIN, MONITOR_EDITOR, MONITOR_READER, Permission, Role, TEAM_ADMIN, TEAM_EDITOR,
    TEAM_READER,
};
use crate::repository::{GroupRepository, MonitorRepository, TeamRepository, UserRepository};
use crate::{Error, Result};

const MIN_PASSWORD_LEN: usize = 8;

/// Loads a team and checks that `username` may act within it.
async fn authorized_team(
    teams: &dyn TeamRepository,
    authorizer: &Authorizer,
    team_id: &str,
    username: &str,
    permissions: &[Permission],
) -> Result<Team> {
    let team = teams
        .get(team_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("team {team_id} not found")))?;
    authorizer.authorize_team_action(&team, username, permissions)?;
    Ok(team)
}

pub struct MonitorService {
    monitors: Arc<dyn MonitorRepository>,
    teams: Arc<dyn TeamRepository>,
    groups: Arc<dyn GroupRepository>,
    registry: Arc<MonitorRegistry>,
    engine: Arc<CheckEngine>,
    events: Arc<Broadcaster<MonitorEvent>>,
    authorizer: Authorizer,
}

impl MonitorService {
    pub fn new(
        monitors: Arc<dyn MonitorRepository>,
        teams: Arc<dyn TeamRepository>,
        groups: Arc<dyn GroupRepository>,
        registry: Arc<MonitorRegistry>,
        engine: Arc<CheckEngine>,
        events: Arc<Broadcaster<MonitorEvent>>,
    ) -> Self {
        Self {
            monitors,
            teams,
            groups,
            registry,
            engine,
            events,
            authorizer: Authorizer::default(),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Authorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    async fn authorize(
        &self,
        team_id: &str,
        username: &str,
        permissions: &[Permission],
    ) -> Result<Team> {
        authorized_team(
            self.teams.as_ref(),
            &self.authorizer,
            team_id,
            username,
            permissions,
        )
        .await
    }

    /// Monitors of other teams are reported as missing.
    async fn find_in_team(&self, team_id: &str, id: &str) -> Result<Monitor> {
        self.monitors
            .get(id)
            .await?
            .filter(|monitor| monitor.team_id == team_id)
            .ok_or_else(|| Error::not_found(format!("monitor {id} not found in team {team_id}")))
    }

    async fn ensure_group_exists(&self, monitor: &Monitor) -> Result<()> {
        match self.groups.get(&monitor.team_id, &monitor.group_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::validation(format!(
                "monitor group {} does not exist in team {}",
                monitor.group_id, monitor.team_id
            ))),
        }
    }

    /// Decodes `payload`, assigns it to the team and stores it.
    pub async fn create_monitor(
        &self,
        username: &str,
        team_id: &str,
        payload: &[u8],
    ) -> Result<Monitor> {
        self.authorize(team_id, username, &[MONITOR_EDITOR]).await?;

        let mut monitor = self.registry.decode(payload)?;
        monitor.team_id = team_id.to_string();
        monitor.validate()?;
        self.ensure_group_exists(&monitor).await?;

        let monitor = self.monitors.insert(monitor).await?;
        info!(monitor_id = %monitor.id, team_id, kind = %monitor.kind(), "monitor created");
        self.events.broadcast(MonitorEvent::created(&monitor));
        Ok(monitor)
    }

    pub async fn list_monitors(&self, username: &str, team_id: &str) -> Result<Vec<Monitor>> {
        self.authorize(team_id, username, &[MONITOR_READER]).await?;
        self.monitors.list_by_team(team_id).await
    }

    pub async fn get_monitor(&self, username: &str, team_id: &str, id: &str) -> Result<Monitor> {
        self.authorize(team_id, username, &[MONITOR_READER]).await?;
        self.find_in_team(team_id, id).await
    }

    /// Replaces a monitor. The stored id and team are kept whatever the
    /// payload says.
    pub async fn update_monitor(
        &self,
        username: &str,
        team_id: &str,
        id: &str,
        payload: &[u8],
    ) -> Result<Monitor> {
        self.authorize(team_id, username, &[MONITOR_EDITOR]).await?;
        let existing = self.find_in_team(team_id, id).await?;

        let mut monitor = self.registry.decode(payload)?;
        monitor.id = existing.id;
        monitor.team_id = existing.team_id;
        monitor.validate()?;
        self.ensure_group_exists(&monitor).await?;

        let monitor = self.monitors.update(monitor).await?;
        info!(monitor_id = %monitor.id, team_id, "monitor edited");
        self.events.broadcast(MonitorEvent::edited(&monitor));
        Ok(monitor)
    }

    pub async fn delete_monitor(&self, username: &str, team_id: &str, id: &str) -> Result<()> {
        self.authorize(team_id, username, &[MONITOR_ADMIN]).await?;
        self.find_in_team(team_id, id).await?;

        let monitor = self.monitors.delete(id).await?;
        info!(monitor_id = %monitor.id, team_id, "monitor deleted");
        self.events
            .broadcast(MonitorEvent::deleted(monitor.id, monitor.team_id));
        Ok(())
    }

    /// Executes a monitor on demand, bracketed by started/stopped events.
    pub async fn run_monitor(
        &self,
        username: &str,
        team_id: &str,
        id: &str,
    ) -> Result<MonitorResponse> {
        self.authorize(team_id, username, &[MONITOR_EDITOR]).await?;
        let monitor = self.find_in_team(team_id, id).await?;

        self.events.broadcast(MonitorEvent::started(&monitor));
        let response = self.engine.run(&monitor).await;
        self.events.broadcast(MonitorEvent::stopped(&monitor));

        info!(monitor_id = %monitor.id, status = %response.status(), "on-demand check finished");
        Ok(response)
    }

    /// Subscribes to the events of one team after checking that `username`
    /// may read its monitors. Other teams' events never reach the queue.
    pub async fn subscribe(
        &self,
        username: &str,
        team_id: &str,
    ) -> Result<Subscription<MonitorEvent>> {
        self.authorize(team_id, username, &[MONITOR_READER]).await?;
        let team_id = team_id.to_string();
        Ok(self
            .events
            .subscribe_filtered(move |event: &MonitorEvent| event.team_id == team_id))
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.events.unsubscribe(id);
    }
}

pub struct GroupService {
    groups: Arc<dyn GroupRepository>,
    teams: Arc<dyn TeamRepository>,
    monitors: Arc<dyn MonitorRepository>,
    authorizer: Authorizer,
}

impl GroupService {
    pub fn new(
        groups: Arc<dyn GroupRepository>,
        teams: Arc<dyn TeamRepository>,
        monitors: Arc<dyn MonitorRepository>,
    ) -> Self {
        Self {
            groups,
            teams,
            monitors,
            authorizer: Authorizer::default(),
        }
    }

    async fn authorize(
        &self,
        team_id: &str,
        username: &str,
        permissions: &[Permission],
    ) -> Result<Team> {
        authorized_team(
            self.teams.as_ref(),
            &self.authorizer,
            team_id,
            username,
            permissions,
        )
        .await
    }

    async fn find(&self, team_id: &str, group_id: &str) -> Result<MonitorGroup> {
        if group_id.is_empty() {
            return Err(Error::validation("monitor group id is required"));
        }
        self.groups
            .get(team_id, group_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("monitor group {group_id} not found in team {team_id}"))
            })
    }

    pub async fn create_group(
        &self,
        username: &str,
        team_id: &str,
        name: &str,
        description: &str,
    ) -> Result<MonitorGroup> {
        let team = self.authorize(team_id, username, &[TEAM_EDITOR]).await?;
        let group = self
            .groups
            .insert(MonitorGroup::new(name, description, team.id)?)
            .await?;
        info!(group_id = %group.id, team_id, "monitor group created");
        Ok(group)
    }

    pub async fn list_groups(&self, username: &str, team_id: &str) -> Result<Vec<MonitorGroup>> {
        self.authorize(team_id, username, &[TEAM_READER]).await?;
        self.groups.list_by_team(team_id).await
    }

    pub async fn get_group(
        &self,
        username: &str,
        team_id: &str,
        group_id: &str,
    ) -> Result<MonitorGroup> {
        self.authorize(team_id, username, &[TEAM_READER]).await?;
        self.find(team_id, group_id).await
    }

    pub async fn update_group(
        &self,
        username: &str,
        team_id: &str,
        group_id: &str,
        name: &str,
        description: &str,
    ) -> Result<MonitorGroup> {
        self.authorize(team_id, username, &[TEAM_EDITOR]).await?;
        let mut group = self.find(team_id, group_id).await?;
        group.rename(name, description)?;
        let group = self.groups.update(group).await?;
        info!(group_id = %group.id, team_id, "monitor group updated");
        Ok(group)
    }

    /// Groups that still hold monitors cannot be deleted.
    pub async fn delete_group(&self, username: &str, team_id: &str, group_id: &str) -> Result<()> {
        self.authorize(team_id, username, &[TEAM_EDITOR]).await?;
        self.find(team_id, group_id).await?;

        let in_use = self
            .monitors
            .list_by_team(team_id)
            .await?
            .iter()
            .filter(|monitor| monitor.group_id == group_id)
            .count();
        if in_use > 0 {
            return Err(Error::conflict(format!(
                "monitor group {group_id} still holds {in_use} monitor(s)"
            )));
        }

        self.groups.delete(team_id, group_id).await?;
        info!(group_id, team_id, "monitor group deleted");
        Ok(())
    }
}

pub struct TeamService {
    teams: Arc<dyn TeamRepository>,
    users: Arc<dyn UserRepository>,
    monitors: Arc<dyn MonitorRepository>,
    groups: Arc<dyn GroupRepository>,
    events: Arc<Broadcaster<MonitorEvent>>,
    authorizer: Authorizer,
}

impl TeamService {
    pub fn new(
        teams: Arc<dyn TeamRepository>,
        users: Arc<dyn UserRepository>,
        monitors: Arc<dyn MonitorRepository>,
        groups: Arc<dyn GroupRepository>,
        events: Arc<Broadcaster<MonitorEvent>>,
    ) -> Self {
        Self {
            teams,
            users,
            monitors,
            groups,
            events,
            authorizer: Authorizer::default(),
        }
    }

    async fn authorize(
        &self,
        team_id: &str,
        username: &str,
        permissions: &[Permission],
    ) -> Result<Team> {
        authorized_team(
            self.teams.as_ref(),
            &self.authorizer,
            team_id,
            username,
            permissions,
        )
        .await
    }

    /// Creates a team owned by `username`.
    pub async fn create_team(&self, username: &str, name: &str, description: &str) -> Result<Team> {
        let team = self
            .teams
            .insert(Team::new(name, description, username)?)
            .await?;
        info!(team_id = %team.id, owner = username, "team created");
        Ok(team)
    }

    pub async fn list_teams(&self, username: &str) -> Result<Vec<Team>> {
        self.teams.list_for_member(username).await
    }

    pub async fn get_team(&self, username: &str, team_id: &str) -> Result<Team> {
        self.authorize(team_id, username, &[TEAM_READER]).await
    }

    /// Changes name and description; the team id is stable.
    pub async fn update_team(
        &self,
        username: &str,
        team_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Team> {
        let mut team = self.authorize(team_id, username, &[TEAM_EDITOR]).await?;
        team.rename(name, description)?;
        let team = self.teams.update(team).await?;
        info!(team_id, "team updated");
        Ok(team)
    }

    /// Adds a registered user. Granting ownership needs team administration.
    pub async fn add_member(
        &self,
        username: &str,
        team_id: &str,
        member: &str,
        role: Role,
    ) -> Result<Team> {
        let mut team = self.authorize(team_id, username, &[TEAM_EDITOR]).await?;
        if role == Role::Owner {
            self.authorizer
                .authorize_team_action(&team, username, &[TEAM_ADMIN])?;
        }
        let user = self.users.get_by_username(member).await?.ok_or_else(|| {
            warn!(team_id, member, "cannot add unknown user to team");
            Error::not_found(format!("user {member} not found"))
        })?;

        team.add_member(user.username, role)?;
        self.teams.update(team).await
    }

    pub async fn change_member_role(
        &self,
        username: &str,
        team_id: &str,
        member: &str,
        role: Role,
    ) -> Result<Team> {
        let mut team = self.authorize(team_id, username, &[TEAM_ADMIN]).await?;
        team.change_member_role(member, role)?;
        info!(team_id, member, %role, "member role changed");
        self.teams.update(team).await
    }

    /// Removing an owner needs team administration; the last owner stays.
    pub async fn remove_member(&self, username: &str, team_id: &str, member: &str) -> Result<Team> {
        let mut team = self.authorize(team_id, username, &[TEAM_EDITOR]).await?;
        if team.member_role(member) == Some(Role::Owner) {
            self.authorizer
                .authorize_team_action(&team, username, &[TEAM_ADMIN])?;
        }
        team.remove_member(member)?;
        self.teams.update(team).await
    }

    /// Deletes the team together with its monitors and groups. Subscribers
    /// get a deletion event for every removed monitor.
    pub async fn delete_team(&self, username: &str, team_id: &str) -> Result<()> {
        self.authorize(team_id, username, &[TEAM_ADMIN]).await?;

        let monitors = self.monitors.delete_by_team(team_id).await?;
        let groups = self.groups.delete_by_team(team_id).await?;
        self.teams.delete(team_id).await?;

        for monitor in &monitors {
            self.events
                .broadcast(MonitorEvent::deleted(monitor.id.clone(), monitor.team_id.clone()));
        }
        info!(team_id, monitors = monitors.len(), groups, "team deleted");
        Ok(())
    }
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    auth: AuthService,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, auth: AuthService) -> Self {
        Self { users, auth }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::validation("username cannot be empty"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let hash = self.auth.hash_password(password)?;
        let user = self.users.insert(User::new(username, hash)).await?;
        info!(username = %user.username, "user registered");
        Ok(user)
    }

    /// Returns a bearer token for valid credentials. Unknown users and wrong
    /// passwords are indistinguishable to the caller.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let invalid = || Error::auth("invalid username or password");
        let user = self
            .users
            .get_by_username(username)
            .await?
            .ok_or_else(invalid)?;
        if !self.auth.verify_password(password, &user.password_hash)? {
            return Err(invalid());
        }
        self.auth.issue_token(&user.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{
        HttpClient, HttpRequest, HttpResponse, MonitorEventKind, Prober, Protocol, ResponseStatus,
        TransportError,
    };
    use crate::repository::{
        InMemoryGroupRepository, InMemoryMonitorRepository, InMemoryTeamRepository,
        InMemoryUserRepository,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::io;
    use std::time::Duration;

    struct DownClient;

    #[async_trait]
    impl HttpClient for DownClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            Err(TransportError::Unavailable("connection refused".to_string()))
        }
    }

    struct UpProber;

    #[async_trait]
    impl Prober for UpProber {
        async fn probe(&self, _: Protocol, _: &str, _: Duration) -> io::Result<Duration> {
            Ok(Duration::from_millis(3))
        }
    }

    struct Fixture {
        monitors: MonitorService,
        groups: GroupService,
        teams: TeamService,
    }

    const USERS: [&str; 5] = ["alice", "bob", "mo", "vera", "eve"];

    /// Team "core" owned by alice, with mo as member, vera as viewer and a
    /// monitor group "g1". bob and eve are registered but in no team.
    async fn fixture() -> Fixture {
        let users: Arc<dyn UserRepository> = Arc::new(InMemoryUserRepository::new());
        for name in USERS {
            users
                .insert(User::new(name, "hash".to_string()))
                .await
                .unwrap();
        }
        let team_repo: Arc<dyn TeamRepository> = Arc::new(InMemoryTeamRepository::new());
        let monitor_repo: Arc<dyn MonitorRepository> = Arc::new(InMemoryMonitorRepository::new());
        let group_repo: Arc<dyn GroupRepository> = Arc::new(InMemoryGroupRepository::new());
        let events = Arc::new(Broadcaster::new());

        let teams = TeamService::new(
            team_repo.clone(),
            users,
            monitor_repo.clone(),
            group_repo.clone(),
            events.clone(),
        );
        teams.create_team("alice", "Core", "").await.unwrap();
        teams
            .add_member("alice", "core", "vera", Role::Viewer)
            .await
            .unwrap();
        teams
            .add_member("alice", "core", "mo", Role::Member)
            .await
            .unwrap();

        let groups = GroupService::new(group_repo.clone(), team_repo.clone(), monitor_repo.clone());
        groups.create_group("alice", "core", "g1", "").await.unwrap();

        let engine = CheckEngine::new(Arc::new(DownClient), Arc::new(UpProber));
        let monitors = MonitorService::new(
            monitor_repo,
            team_repo,
            group_repo,
            Arc::new(MonitorRegistry::with_builtin_kinds()),
            Arc::new(engine),
            events,
        );
        Fixture {
            monitors,
            groups,
            teams,
        }
    }

    fn ping_payload(name: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "kind": "ping", "name": name, "interval": 60, "groupId": "g1",
            "config": {"host": "db.internal", "port": "5432", "protocol": "tcp", "timeout": 2, "retryCount": 1}
        }))
        .unwrap()
    }

    fn http_payload(name: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "kind": "http", "name": name, "interval": 30, "groupId": "g1",
            "config": {"httpMethod": "GET", "url": "https://example.com", "expectedStatusCodes": [200]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_publishes_and_assigns_team() {
        let fx = fixture().await;
        let mut sub = fx.monitors.subscribe("vera", "core").await.unwrap();

        let monitor = fx
            .monitors
            .create_monitor("mo", "core", &ping_payload("DB ping"))
            .await
            .unwrap();

        assert_eq!(monitor.id, "db-ping");
        assert_eq!(monitor.team_id, "core");
        let event = sub.recv().await.unwrap();
        assert_eq!(event.status, MonitorEventKind::Created);
        assert_eq!(event.team_id, "core");
    }

    #[tokio::test]
    async fn viewers_cannot_create_and_outsiders_cannot_read() {
        let fx = fixture().await;

        assert!(matches!(
            fx.monitors
                .create_monitor("vera", "core", &ping_payload("x"))
                .await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.monitors.list_monitors("mallory", "core").await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.monitors.list_monitors("alice", "nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        let fx = fixture().await;

        let unknown = serde_json::to_vec(&json!({"kind": "carrier-pigeon", "config": {}})).unwrap();
        assert!(matches!(
            fx.monitors.create_monitor("mo", "core", &unknown).await,
            Err(Error::Decode(_))
        ));

        let invalid = serde_json::to_vec(&json!({
            "kind": "ping", "name": "x", "interval": 0, "groupId": "g", "config": {}
        }))
        .unwrap();
        assert!(matches!(
            fx.monitors.create_monitor("mo", "core", &invalid).await,
            Err(Error::InvalidMonitor(_))
        ));
        assert!(fx.monitors.list_monitors("mo", "core").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_keeps_id_and_delete_requires_admin() {
        let fx = fixture().await;
        fx.monitors
            .create_monitor("mo", "core", &ping_payload("DB ping"))
            .await
            .unwrap();

        let updated = fx
            .monitors
            .update_monitor("mo", "core", "db-ping", &http_payload("Renamed"))
            .await
            .unwrap();
        assert_eq!(updated.id, "db-ping");
        assert_eq!(updated.name, "Renamed");
        assert_eq!(
            fx.monitors.get_monitor("vera", "core", "db-ping").await.unwrap(),
            updated
        );

        assert!(matches!(
            fx.monitors.delete_monitor("mo", "core", "db-ping").await,
            Err(Error::Forbidden(_))
        ));
        fx.monitors
            .delete_monitor("alice", "core", "db-ping")
            .await
            .unwrap();
        assert!(matches!(
            fx.monitors.get_monitor("alice", "core", "db-ping").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn monitors_are_scoped_to_their_team() {
        let fx = fixture().await;
        fx.teams.create_team("alice", "Other", "").await.unwrap();
        fx.groups.create_group("alice", "other", "g1", "").await.unwrap();
        fx.monitors
            .create_monitor("alice", "other", &ping_payload("Hidden"))
            .await
            .unwrap();

        assert!(matches!(
            fx.monitors.get_monitor("alice", "core", "hidden").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn run_is_bracketed_by_events() {
        let fx = fixture().await;
        fx.monitors
            .create_monitor("mo", "core", &ping_payload("DB ping"))
            .await
            .unwrap();
        fx.monitors
            .create_monitor("mo", "core", &http_payload("Site"))
            .await
            .unwrap();
        let mut sub = fx.monitors.subscribe("mo", "core").await.unwrap();

        let ping = fx.monitors.run_monitor("mo", "core", "db-ping").await.unwrap();
        assert_eq!(ping.status(), ResponseStatus::Success);
        assert_eq!(ping.tries(), Some(1));

        let http = fx.monitors.run_monitor("mo", "core", "site").await.unwrap();
        assert_eq!(http.status(), ResponseStatus::Error);

        let kinds: Vec<_> = (0..4)
            .map(|_| sub.try_recv().unwrap().status)
            .collect();
        assert_eq!(
            kinds,
            [
                MonitorEventKind::Started,
                MonitorEventKind::Stopped,
                MonitorEventKind::Started,
                MonitorEventKind::Stopped
            ]
        );
        fx.monitors.unsubscribe(sub.id());
    }

    #[tokio::test]
    async fn team_membership_management() {
        let fx = fixture().await;

        assert!(matches!(
            fx.teams.add_member("mo", "core", "eve", Role::Viewer).await,
            Err(Error::Forbidden(_))
        ));
        let team = fx
            .teams
            .change_member_role("alice", "core", "mo", Role::Admin)
            .await
            .unwrap();
        assert_eq!(team.member_role("mo"), Some(Role::Admin));

        fx.teams.remove_member("mo", "core", "vera").await.unwrap();
        assert!(matches!(
            fx.teams.get_team("vera", "core").await,
            Err(Error::Forbidden(_))
        ));

        assert!(matches!(
            fx.teams.delete_team("mo", "core").await,
            Err(Error::Forbidden(_))
        ));
        fx.teams.delete_team("alice", "core").await.unwrap();
        assert!(fx.teams.list_teams("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admins_cannot_take_over_a_team() {
        let fx = fixture().await;
        fx.teams
            .change_member_role("alice", "core", "mo", Role::Admin)
            .await
            .unwrap();

        assert!(matches!(
            fx.teams
                .change_member_role("mo", "core", "mo", Role::Owner)
                .await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.teams.remove_member("mo", "core", "alice").await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.teams.add_member("mo", "core", "bob", Role::Owner).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.teams.delete_team("mo", "core").await,
            Err(Error::Forbidden(_))
        ));

        let team = fx.teams.get_team("alice", "core").await.unwrap();
        assert_eq!(team.member_role("alice"), Some(Role::Owner));
        assert_eq!(team.member_role("mo"), Some(Role::Admin));
        assert!(!team.is_member("bob"));
    }

    #[tokio::test]
    async fn the_last_owner_stays() {
        let fx = fixture().await;

        assert!(matches!(
            fx.teams
                .change_member_role("alice", "core", "alice", Role::Viewer)
                .await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            fx.teams.remove_member("alice", "core", "alice").await,
            Err(Error::Validation(_))
        ));

        fx.teams
            .add_member("alice", "core", "bob", Role::Owner)
            .await
            .unwrap();
        fx.teams.remove_member("bob", "core", "alice").await.unwrap();
        let team = fx.teams.get_team("bob", "core").await.unwrap();
        assert!(!team.is_member("alice"));
    }

    #[tokio::test]
    async fn only_registered_users_can_join() {
        let fx = fixture().await;

        assert!(matches!(
            fx.teams
                .add_member("alice", "core", "ghost", Role::Viewer)
                .await,
            Err(Error::NotFound(_))
        ));
        let team = fx
            .teams
            .add_member("alice", "core", "eve", Role::Viewer)
            .await
            .unwrap();
        assert_eq!(team.member_role("eve"), Some(Role::Viewer));
    }

    #[tokio::test]
    async fn update_team_keeps_id() {
        let fx = fixture().await;

        assert!(matches!(
            fx.teams.update_team("vera", "core", "Renamed", "").await,
            Err(Error::Forbidden(_))
        ));
        let team = fx
            .teams
            .update_team("alice", "core", "Core Platform", "infra")
            .await
            .unwrap();
        assert_eq!(team.id, "core");
        assert_eq!(team.name, "Core Platform");
        assert_eq!(
            fx.teams.get_team("vera", "core").await.unwrap().description,
            "infra"
        );
    }

    #[tokio::test]
    async fn deleting_a_team_removes_its_monitors_and_groups() {
        let fx = fixture().await;
        fx.monitors
            .create_monitor("mo", "core", &ping_payload("DB"))
            .await
            .unwrap();
        let mut sub = fx.monitors.subscribe("vera", "core").await.unwrap();

        fx.teams.delete_team("alice", "core").await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.status, MonitorEventKind::Deleted);
        assert_eq!(event.id, "db");

        fx.teams.create_team("bob", "Core", "").await.unwrap();
        assert!(fx.monitors.list_monitors("bob", "core").await.unwrap().is_empty());
        assert!(fx.groups.list_groups("bob", "core").await.unwrap().is_empty());

        fx.groups.create_group("bob", "core", "g1", "").await.unwrap();
        let monitor = fx
            .monitors
            .create_monitor("bob", "core", &ping_payload("DB"))
            .await
            .unwrap();
        assert_eq!(monitor.id, "db");
    }

    #[tokio::test]
    async fn monitor_groups_are_managed_per_team() {
        let fx = fixture().await;

        assert!(matches!(
            fx.groups.create_group("mo", "core", "Edge", "").await,
            Err(Error::Forbidden(_))
        ));
        let group = fx
            .groups
            .create_group("alice", "core", "Edge Nodes", "PoPs")
            .await
            .unwrap();
        assert_eq!(group.id, "edge-nodes");
        assert!(matches!(
            fx.groups.create_group("alice", "core", "edge nodes", "").await,
            Err(Error::Conflict(_))
        ));

        let ids: Vec<_> = fx
            .groups
            .list_groups("vera", "core")
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids, ["edge-nodes", "g1"]);

        let renamed = fx
            .groups
            .update_group("alice", "core", "edge-nodes", "Edge", "")
            .await
            .unwrap();
        assert_eq!(renamed.id, "edge-nodes");
        assert_eq!(
            fx.groups.get_group("vera", "core", "edge-nodes").await.unwrap().name,
            "Edge"
        );
        assert!(matches!(
            fx.groups.get_group("vera", "core", "").await,
            Err(Error::Validation(_))
        ));

        fx.groups
            .delete_group("alice", "core", "edge-nodes")
            .await
            .unwrap();
        assert!(matches!(
            fx.groups.get_group("vera", "core", "edge-nodes").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            fx.groups.list_groups("eve", "core").await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn monitors_must_reference_an_existing_group() {
        let fx = fixture().await;
        let orphan = serde_json::to_vec(&json!({
            "kind": "ping", "name": "Orphan", "interval": 60, "groupId": "missing",
            "config": {"host": "db.internal", "port": "5432", "protocol": "tcp", "timeout": 2, "retryCount": 1}
        }))
        .unwrap();

        assert!(matches!(
            fx.monitors.create_monitor("mo", "core", &orphan).await,
            Err(Error::Validation(_))
        ));

        fx.monitors
            .create_monitor("mo", "core", &ping_payload("DB"))
            .await
            .unwrap();
        assert!(matches!(
            fx.groups.delete_group("alice", "core", "g1").await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn subscriptions_only_see_their_team() {
        let fx = fixture().await;
        fx.teams.create_team("alice", "Other", "").await.unwrap();
        fx.groups.create_group("alice", "other", "g1", "").await.unwrap();
        let mut core = fx.monitors.subscribe("alice", "core").await.unwrap();

        fx.monitors
            .create_monitor("alice", "other", &ping_payload("Elsewhere"))
            .await
            .unwrap();
        fx.monitors
            .create_monitor("alice", "core", &ping_payload("Here"))
            .await
            .unwrap();

        let event = core.try_recv().unwrap();
        assert_eq!(event.id, "here");
        assert!(core.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_and_login() {
        let users = UserService::new(
            Arc::new(InMemoryUserRepository::new()),
            AuthService::new("secret", 60),
        );

        users.register("alice", "correct horse").await.unwrap();
        assert!(matches!(
            users.register("alice", "another pass").await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            users.register("bob", "short").await,
            Err(Error::Validation(_))
        ));

        let token = users.login("alice", "correct horse").await.unwrap();
        assert_eq!(users.auth().verify_token(&token).unwrap().sub, "alice");
        assert!(matches!(
            users.login("alice", "wrong password").await,
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            users.login("nobody", "whatever1").await,
            Err(Error::Auth(_))
        ));
    }
}
