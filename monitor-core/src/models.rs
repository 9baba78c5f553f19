use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::permission::Role;
use crate::{Error, Result};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-]+").expect("valid regex"));
static HYPHEN_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid regex"));

/// Derives a URL-safe identifier from a human readable name,
/// e.g. `"API  Health!"` becomes `"api-health"`.
pub fn display_id_from(name: &str) -> String {
    let lowered = name.to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lowered, "-");
    let stripped = DISALLOWED.replace_all(&hyphenated, "");
    let collapsed = HYPHEN_RUNS.replace_all(&stripped, "-");
    collapsed.trim_matches('-').to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub description: String,
    pub members: Vec<TeamMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Creates a team owned by `owner`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        owner: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let now = Utc::now();
        let team = Self {
            id: display_id_from(&name),
            name,
            description: description.into(),
            members: vec![TeamMember {
                username: owner.into(),
                role: Role::Owner,
            }],
            created_at: now,
            updated_at: now,
        };
        team.validate()?;
        Ok(team)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("team name cannot be empty"));
        }
        if self.id.is_empty() {
            return Err(Error::validation(format!(
                "team name '{}' does not produce a usable id",
                self.name
            )));
        }
        if self.owner_count() == 0 {
            return Err(Error::validation("team must have at least one owner"));
        }
        Ok(())
    }

    /// Renames the team. The id stays the one derived at creation so that
    /// monitors and groups keep pointing at it.
    pub fn rename(&mut self, name: impl Into<String>, description: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("team name cannot be empty"));
        }
        self.name = name;
        self.description = description.into();
        self.updated_at = Utc::now();
        Ok(())
    }

    fn owner_count(&self) -> usize {
        self.members
            .iter()
            .filter(|member| member.role == Role::Owner)
            .count()
    }

    /// True when `username` is the only owner left.
    fn is_last_owner(&self, username: &str) -> bool {
        self.member_role(username) == Some(Role::Owner) && self.owner_count() == 1
    }

    pub fn member_role(&self, username: &str) -> Option<Role> {
        self.members
            .iter()
            .find(|member| member.username == username)
            .map(|member| member.role)
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.member_role(username).is_some()
    }

    pub fn add_member(&mut self, username: impl Into<String>, role: Role) -> Result<()> {
        let username = username.into();
        if self.is_member(&username) {
            return Err(Error::conflict(format!(
                "user {} is already a member of team {}",
                username, self.name
            )));
        }
        self.members.push(TeamMember { username, role });
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn change_member_role(&mut self, username: &str, role: Role) -> Result<()> {
        if role != Role::Owner && self.is_last_owner(username) {
            return Err(Error::validation(format!(
                "cannot demote {username}, the last owner of team {}",
                self.name
            )));
        }
        let member = self
            .members
            .iter_mut()
            .find(|member| member.username == username)
            .ok_or_else(|| {
                Error::not_found(format!("user {} is not a member of team {}", username, self.name))
            })?;
        member.role = role;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_member(&mut self, username: &str) -> Result<TeamMember> {
        let index = self
            .members
            .iter()
            .position(|member| member.username == username)
            .ok_or_else(|| {
                Error::not_found(format!("user {} is not a member of team {}", username, self.name))
            })?;
        if self.is_last_owner(username) {
            return Err(Error::validation(format!(
                "cannot remove {username}, the last owner of team {}",
                self.name
            )));
        }
        self.updated_at = Utc::now();
        Ok(self.members.remove(index))
    }
}

/// Organisational bucket for monitors within a team. Access control stays
/// at the team level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorGroup {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitorGroup {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let now = Utc::now();
        let group = Self {
            id: display_id_from(&name),
            team_id: team_id.into(),
            name,
            description: description.into(),
            created_at: now,
            updated_at: now,
        };
        group.validate()?;
        Ok(group)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("monitor group name cannot be empty"));
        }
        if self.id.is_empty() {
            return Err(Error::validation(format!(
                "monitor group name '{}' does not produce a usable id",
                self.name
            )));
        }
        Ok(())
    }

    /// Updates name and description; the id is kept so monitors stay attached.
    pub fn rename(&mut self, name: impl Into<String>, description: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("monitor group name cannot be empty"));
        }
        self.name = name;
        self.description = description.into();
        self.updated_at = Utc::now();
        Ok(())
    }
}
