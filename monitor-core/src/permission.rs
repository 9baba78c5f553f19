//! Team roles, the permissions they grant and the implication graph between
//! permissions.
//!
//! The closure of the implication graph is computed once when a
//! [`PermissionResolver`] is built, so answering a query is a set lookup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// An action that can be performed within a team, keyed by a stable id such
/// as `"edit:team"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Permission {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

impl Permission {
    pub const fn new(id: &'static str, name: &'static str, description: &'static str) -> Self {
        Self { id, name, description }
    }
}

pub const MONITOR_ADMIN: Permission =
    Permission::new("admin:monitor", "Delete Monitors", "Allows deleting monitors.");
pub const MONITOR_EDITOR: Permission =
    Permission::new("edit:monitor", "Manage Monitors", "Allows editing and creating monitors.");
pub const MONITOR_READER: Permission = Permission::new(
    "read:monitor",
    "Read Monitors",
    "Allows reading monitor details and statuses.",
);

pub const TEAM_ADMIN: Permission =
    Permission::new("admin:team", "Administrate Team", "Allows deleting teams.");
pub const TEAM_EDITOR: Permission = Permission::new(
    "edit:team",
    "Manage Team",
    "Allows adding and removing members from the team.",
);
pub const TEAM_READER: Permission =
    Permission::new("read:team", "Read Teams", "Allows reading team details and members.");

pub const ALL_PERMISSIONS: [Permission; 6] = [
    MONITOR_ADMIN,
    MONITOR_EDITOR,
    MONITOR_READER,
    TEAM_ADMIN,
    TEAM_EDITOR,
    TEAM_READER,
];

/// Permission -> permissions it directly grants.
const IMPLICATIONS: &[(Permission, &[Permission])] = &[
    (TEAM_ADMIN, &[TEAM_EDITOR]),
    (TEAM_EDITOR, &[TEAM_READER]),
    (TEAM_READER, &[]),
    (MONITOR_ADMIN, &[MONITOR_EDITOR]),
    (MONITOR_EDITOR, &[MONITOR_READER]),
    (MONITOR_READER, &[]),
];

const ROLE_PERMISSIONS: &[(Role, &[Permission])] = &[
    (Role::Owner, &[TEAM_ADMIN, MONITOR_ADMIN]),
    (Role::Admin, &[TEAM_EDITOR, MONITOR_ADMIN]),
    (Role::Member, &[TEAM_READER, MONITOR_EDITOR]),
    (Role::Viewer, &[TEAM_READER, MONITOR_READER]),
];

/// Role of a member within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid team role: {0}")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionGraphError {
    #[error("permission implication cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Answers "does role R grant every permission in P".
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    closure: HashMap<&'static str, HashSet<&'static str>>,
    roles: HashMap<Role, HashSet<&'static str>>,
}

static BUILTIN: LazyLock<PermissionResolver> = LazyLock::new(|| {
    PermissionResolver::new(IMPLICATIONS, ROLE_PERMISSIONS)
        .expect("builtin permission implications are acyclic")
});

impl PermissionResolver {
    /// The resolver over the built-in role and implication tables.
    pub fn builtin() -> &'static PermissionResolver {
        &BUILTIN
    }

    /// Builds a resolver, rejecting implication graphs that contain a cycle.
    pub fn new(
        implications: &[(Permission, &[Permission])],
        roles: &[(Role, &[Permission])],
    ) -> Result<Self, PermissionGraphError> {
        let graph: HashMap<&'static str, Vec<&'static str>> = implications
            .iter()
            .map(|(perm, implied)| (perm.id, implied.iter().map(|p| p.id).collect()))
            .collect();

        let mut closure = HashMap::new();
        for start in graph.keys() {
            let mut path = Vec::new();
            expand(*start, &graph, &mut closure, &mut path)?;
        }

        let roles = roles
            .iter()
            .map(|(role, base)| {
                let mut granted = HashSet::new();
                for perm in base.iter() {
                    granted.insert(perm.id);
                    if let Some(implied) = closure.get(perm.id) {
                        granted.extend(implied.iter().copied());
                    }
                }
                (*role, granted)
            })
            .collect();

        Ok(Self { closure, roles })
    }

    /// Every permission id implied by `permission`, itself included.
    pub fn effective_permissions(&self, permission: &Permission) -> HashSet<&'static str> {
        let mut result = self.closure.get(permission.id).cloned().unwrap_or_default();
        result.insert(permission.id);
        result
    }

    /// True iff `role` grants every requested permission. An empty request is
    /// never satisfied.
    pub fn role_satisfies(&self, role: Role, permissions: &[Permission]) -> bool {
        if permissions.is_empty() {
            return false;
        }
        let Some(granted) = self.roles.get(&role) else {
            return false;
        };
        permissions.iter().all(|perm| granted.contains(perm.id))
    }

    /// Like [`role_satisfies`](Self::role_satisfies) for a role stored as text;
    /// unrecognized roles grant nothing.
    pub fn role_name_satisfies(&self, role: &str, permissions: &[Permission]) -> bool {
        role.parse::<Role>()
            .is_ok_and(|role| self.role_satisfies(role, permissions))
    }
}

/// Depth-first expansion of `node`, memoized in `closure`. `path` holds the
/// nodes on the current DFS stack for cycle detection.
fn expand(
    node: &'static str,
    graph: &HashMap<&'static str, Vec<&'static str>>,
    closure: &mut HashMap<&'static str, HashSet<&'static str>>,
    path: &mut Vec<&'static str>,
) -> Result<HashSet<&'static str>, PermissionGraphError> {
    if let Some(done) = closure.get(node) {
        return Ok(done.clone());
    }
    if let Some(pos) = path.iter().position(|visited| *visited == node) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|id| id.to_string()).collect();
        cycle.push(node.to_string());
        return Err(PermissionGraphError::Cycle(cycle));
    }

    path.push(node);
    let mut implied = HashSet::new();
    for child in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
        implied.insert(*child);
        implied.extend(expand(*child, graph, closure, path)?);
    }
    path.pop();

    closure.insert(node, implied.clone());
    Ok(implied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_reaches_read_team_transitively() {
        let resolver = PermissionResolver::builtin();

        assert!(resolver.role_satisfies(Role::Owner, &[TEAM_READER]));
        assert!(resolver.role_satisfies(Role::Owner, &[TEAM_EDITOR, MONITOR_READER]));
    }

    #[test]
    fn empty_request_is_denied() {
        assert!(!PermissionResolver::builtin().role_satisfies(Role::Owner, &[]));
    }

    #[test]
    fn role_table() {
        let resolver = PermissionResolver::builtin();

        assert!(!resolver.role_satisfies(Role::Admin, &[TEAM_ADMIN]));
        assert!(resolver.role_satisfies(Role::Admin, &[TEAM_EDITOR, MONITOR_ADMIN]));

        assert!(resolver.role_satisfies(Role::Member, &[MONITOR_EDITOR, MONITOR_READER]));
        assert!(!resolver.role_satisfies(Role::Member, &[MONITOR_ADMIN]));
        assert!(!resolver.role_satisfies(Role::Member, &[TEAM_EDITOR]));

        assert!(resolver.role_satisfies(Role::Viewer, &[TEAM_READER, MONITOR_READER]));
        assert!(!resolver.role_satisfies(Role::Viewer, &[MONITOR_EDITOR]));
    }

    #[test]
    fn all_requested_permissions_must_be_granted() {
        let resolver = PermissionResolver::builtin();
        assert!(!resolver.role_satisfies(Role::Viewer, &[TEAM_READER, MONITOR_EDITOR]));
    }

    #[test]
    fn unknown_role_names_grant_nothing() {
        let resolver = PermissionResolver::builtin();

        assert!(resolver.role_name_satisfies("viewer", &[TEAM_READER]));
        assert!(!resolver.role_name_satisfies("superuser", &[TEAM_READER]));
        assert!(!resolver.role_name_satisfies("", &[TEAM_READER]));
    }

    #[test]
    fn roles_missing_from_table_grant_nothing() {
        let resolver =
            PermissionResolver::new(IMPLICATIONS, &[(Role::Owner, &[TEAM_ADMIN])]).unwrap();

        assert!(resolver.role_satisfies(Role::Owner, &[TEAM_READER]));
        assert!(!resolver.role_satisfies(Role::Viewer, &[TEAM_READER]));
    }

    #[test]
    fn permissions_outside_the_graph_are_not_granted() {
        let audit = Permission::new("read:audit", "Read Audit Log", "");
        assert!(!PermissionResolver::builtin().role_satisfies(Role::Owner, &[audit]));
    }

    #[test]
    fn effective_permissions_include_the_chain() {
        let effective = PermissionResolver::builtin().effective_permissions(&MONITOR_ADMIN);
        let expected: HashSet<_> = ["admin:monitor", "edit:monitor", "read:monitor"].into();
        assert_eq!(effective, expected);
    }

    #[test]
    fn cycles_are_rejected_at_build_time() {
        let a = Permission::new("a", "A", "");
        let b = Permission::new("b", "B", "");
        let c = Permission::new("c", "C", "");
        let graph: &[(Permission, &[Permission])] = &[(a, &[b]), (b, &[c]), (c, &[a])];

        let err = PermissionResolver::new(graph, &[]).unwrap_err();
        let PermissionGraphError::Cycle(cycle) = err;
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn self_implication_is_a_cycle() {
        let a = Permission::new("a", "A", "");
        let graph: &[(Permission, &[Permission])] = &[(a, &[a])];
        assert!(PermissionResolver::new(graph, &[]).is_err());
    }

    #[test]
    fn roles_parse_from_lowercase_names() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(Role::Viewer.to_string(), "viewer");
        assert!("Owner".parse::<Role>().is_err());
    }
}
