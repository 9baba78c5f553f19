use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{MonitorGroup, Team, TeamMember, User};
use crate::monitor::{Monitor, MonitorRegistry};
use crate::repository::{GroupRepository, MonitorRepository, TeamRepository, UserRepository};
use crate::{Error, Result, config::DatabaseConfig};

pub type DatabasePool = Pool<Postgres>;

pub async fn create_pool(config: &DatabaseConfig) -> Result<DatabasePool> {
    let connection_string = format!(
        "postgres://{}:{}@{}:{}/{}",
        config.username, config.password, config.host, config.port, config.database
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&connection_string)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &DatabasePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Unique violations become conflicts, everything else stays a database error.
fn conflict_on_duplicate(err: sqlx::Error, what: String) -> Error {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::conflict(format!("{what} already exists"))
        }
        other => Error::Database(other),
    }
}

const MONITOR_COLUMNS: &str =
    "id, team_id, group_id, name, description, interval_secs, kind, config";

/// Monitors stored as envelope columns plus the variant as a JSONB document.
/// Rows are rehydrated through the registry, so an unknown `kind` in the
/// table surfaces as a decode error.
#[derive(Debug, Clone)]
pub struct PgMonitorRepository {
    pool: DatabasePool,
    registry: Arc<MonitorRegistry>,
}

impl PgMonitorRepository {
    pub fn new(pool: DatabasePool, registry: Arc<MonitorRegistry>) -> Self {
        Self { pool, registry }
    }

    fn monitor_from_row(&self, row: &PgRow) -> Result<Monitor> {
        let kind: String = row.try_get("kind")?;
        let config: serde_json::Value = row.try_get("config")?;
        Ok(Monitor {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            interval: row.try_get("interval_secs")?,
            team_id: row.try_get("team_id")?,
            group_id: row.try_get("group_id")?,
            config: self.registry.decode_config_value(&kind, config)?,
        })
    }

    fn monitors_from_rows(&self, rows: &[PgRow]) -> Result<Vec<Monitor>> {
        rows.iter().map(|row| self.monitor_from_row(row)).collect()
    }
}

#[async_trait]
impl MonitorRepository for PgMonitorRepository {
    async fn insert(&self, monitor: Monitor) -> Result<Monitor> {
        let config = serde_json::to_value(&monitor.config)?;
        sqlx::query(
            "INSERT INTO monitors (id, team_id, group_id, name, description, interval_secs, kind, config) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&monitor.id)
        .bind(&monitor.team_id)
        .bind(&monitor.group_id)
        .bind(&monitor.name)
        .bind(&monitor.description)
        .bind(monitor.interval)
        .bind(monitor.kind().as_str())
        .bind(config)
        .execute(&self.pool)
        .await
        .map_err(|err| conflict_on_duplicate(err, format!("monitor {}", monitor.id)))?;
        Ok(monitor)
    }

    async fn get(&self, id: &str) -> Result<Option<Monitor>> {
        let row = sqlx::query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.monitor_from_row(&row)).transpose()
    }

    async fn list_by_team(&self, team_id: &str) -> Result<Vec<Monitor>> {
        let rows = sqlx::query(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE team_id = $1 ORDER BY id"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        self.monitors_from_rows(&rows)
    }

    async fn list_all(&self) -> Result<Vec<Monitor>> {
        let rows = sqlx::query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        self.monitors_from_rows(&rows)
    }

    async fn update(&self, monitor: Monitor) -> Result<Monitor> {
        let config = serde_json::to_value(&monitor.config)?;
        let result = sqlx::query(
            "UPDATE monitors SET team_id = $2, group_id = $3, name = $4, description = $5, \
             interval_secs = $6, kind = $7, config = $8, updated_at = NOW() WHERE id = $1",
        )
        .bind(&monitor.id)
        .bind(&monitor.team_id)
        .bind(&monitor.group_id)
        .bind(&monitor.name)
        .bind(&monitor.description)
        .bind(monitor.interval)
        .bind(monitor.kind().as_str())
        .bind(config)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("monitor {} not found", monitor.id)));
        }
        Ok(monitor)
    }

    async fn delete(&self, id: &str) -> Result<Monitor> {
        let row = sqlx::query(&format!(
            "DELETE FROM monitors WHERE id = $1 RETURNING {MONITOR_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("monitor {id} not found")))?;
        self.monitor_from_row(&row)
    }

    async fn delete_by_team(&self, team_id: &str) -> Result<Vec<Monitor>> {
        let rows = sqlx::query(&format!(
            "DELETE FROM monitors WHERE team_id = $1 RETURNING {MONITOR_COLUMNS}"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        let mut monitors = self.monitors_from_rows(&rows)?;
        monitors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(monitors)
    }
}

const GROUP_COLUMNS: &str = "team_id, id, name, description, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgGroupRepository {
    pool: DatabasePool,
}

impl PgGroupRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn group_from_row(row: &PgRow) -> Result<MonitorGroup> {
    Ok(MonitorGroup {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn insert(&self, group: MonitorGroup) -> Result<MonitorGroup> {
        sqlx::query(
            "INSERT INTO monitor_groups (team_id, id, name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&group.team_id)
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            conflict_on_duplicate(err, format!("monitor group {} in team {}", group.id, group.team_id))
        })?;
        Ok(group)
    }

    async fn get(&self, team_id: &str, id: &str) -> Result<Option<MonitorGroup>> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM monitor_groups WHERE team_id = $1 AND id = $2"
        ))
        .bind(team_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn list_by_team(&self, team_id: &str) -> Result<Vec<MonitorGroup>> {
        let rows = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM monitor_groups WHERE team_id = $1 ORDER BY id"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn update(&self, group: MonitorGroup) -> Result<MonitorGroup> {
        let result = sqlx::query(
            "UPDATE monitor_groups SET name = $3, description = $4, updated_at = $5 \
             WHERE team_id = $1 AND id = $2",
        )
        .bind(&group.team_id)
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("monitor group {} not found", group.id)));
        }
        Ok(group)
    }

    async fn delete(&self, team_id: &str, id: &str) -> Result<MonitorGroup> {
        let row = sqlx::query(&format!(
            "DELETE FROM monitor_groups WHERE team_id = $1 AND id = $2 RETURNING {GROUP_COLUMNS}"
        ))
        .bind(team_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("monitor group {id} not found in team {team_id}")))?;
        group_from_row(&row)
    }

    async fn delete_by_team(&self, team_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM monitor_groups WHERE team_id = $1")
            .bind(team_id)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

const TEAM_COLUMNS: &str = "id, name, description, members, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgTeamRepository {
    pool: DatabasePool,
}

impl PgTeamRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn team_from_row(row: &PgRow) -> Result<Team> {
    let members: serde_json::Value = row.try_get("members")?;
    let members: Vec<TeamMember> = serde_json::from_value(members)?;
    Ok(Team {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        members,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl TeamRepository for PgTeamRepository {
    async fn insert(&self, team: Team) -> Result<Team> {
        sqlx::query(
            "INSERT INTO teams (id, name, description, members, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&team.id)
        .bind(&team.name)
        .bind(&team.description)
        .bind(serde_json::to_value(&team.members)?)
        .bind(team.created_at)
        .bind(team.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| conflict_on_duplicate(err, format!("team {}", team.id)))?;
        Ok(team)
    }

    async fn get(&self, id: &str) -> Result<Option<Team>> {
        let row = sqlx::query(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(team_from_row).transpose()
    }

    async fn list_for_member(&self, username: &str) -> Result<Vec<Team>> {
        let rows = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams \
             WHERE members @> jsonb_build_array(jsonb_build_object('username', $1::text)) \
             ORDER BY id"
        ))
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(team_from_row).collect()
    }

    async fn update(&self, team: Team) -> Result<Team> {
        let result = sqlx::query(
            "UPDATE teams SET name = $2, description = $3, members = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(&team.id)
        .bind(&team.name)
        .bind(&team.description)
        .bind(serde_json::to_value(&team.members)?)
        .bind(team.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("team {} not found", team.id)));
        }
        Ok(team)
    }

    async fn delete(&self, id: &str) -> Result<Team> {
        let row = sqlx::query(&format!("DELETE FROM teams WHERE id = $1 RETURNING {TEAM_COLUMNS}"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("team {id} not found")))?;
        team_from_row(&row)
    }
}

#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: DatabasePool,
}

impl PgUserRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: User) -> Result<User> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| conflict_on_duplicate(err, format!("user {}", user.username)))?;
        Ok(user)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, created_at, updated_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get::<Uuid, _>("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
