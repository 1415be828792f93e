//! Principals, roles and identity sources.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved workspace id of the pool visible to every tenant.
pub const GLOBAL_WORKSPACE_ID: &str = "global";

/// Role of a user. Determines write/delete permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Member => "member",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "editor" => Ok(Self::Editor),
            "member" => Ok(Self::Member),
            other => Err(Error::invalid(format!("unknown role '{}'", other))),
        }
    }
}

/// Where a user's credentials live. Resolved once, at the authentication boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum IdentitySource {
    /// Password checked locally against a stored hash.
    Local { credential_hash: String },
    /// Identity owned by an external directory (e.g. an LDAP DN).
    External { directory_ref: String },
}

impl IdentitySource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::External { .. } => "external",
        }
    }
}

/// An authenticated caller: the `(user_id, role, workspace_id)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
    /// Owning workspace; `None` only for the bootstrap admin account.
    pub workspace_id: Option<String>,
}

impl Principal {
    pub fn new(user_id: i64, role: Role, workspace_id: Option<String>) -> Self {
        Self {
            user_id,
            role,
            workspace_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// The set of documents a principal may see: own workspace plus the global pool.
///
/// Only `WorkspaceRegistry::resolve_visibility_scope` constructs this outside tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibilityScope {
    pub own_workspace_id: Option<String>,
    pub includes_global: bool,
}

impl VisibilityScope {
    pub fn new(own_workspace_id: Option<String>) -> Self {
        Self {
            own_workspace_id,
            includes_global: true,
        }
    }

    /// Whether a resource owned by `workspace_id` (optionally marked global) is visible.
    pub fn admits(&self, workspace_id: &str, is_global: bool) -> bool {
        if self.includes_global && (is_global || workspace_id == GLOBAL_WORKSPACE_ID) {
            return true;
        }
        self.own_workspace_id.as_deref() == Some(workspace_id)
    }
}

/// Dedup/storage partition of a document: the global pool or its workspace.
pub fn scope_key(workspace_id: &str, is_global: bool) -> &str {
    if is_global {
        GLOBAL_WORKSPACE_ID
    } else {
        workspace_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_admits_own_and_global() {
        let scope = VisibilityScope::new(Some("hr".into()));
        assert!(scope.admits("hr", false));
        assert!(scope.admits("finance", true));
        assert!(scope.admits(GLOBAL_WORKSPACE_ID, false));
        assert!(!scope.admits("finance", false));
    }

    #[test]
    fn test_scope_without_department_is_global_only() {
        let scope = VisibilityScope::new(None);
        assert!(scope.admits("hr", true));
        assert!(!scope.admits("hr", false));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_scope_key() {
        assert_eq!(scope_key("hr", true), GLOBAL_WORKSPACE_ID);
        assert_eq!(scope_key("hr", false), "hr");
    }
}
