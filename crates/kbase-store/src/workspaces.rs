//! Workspace registry and the visibility function.

use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::sqlite::{db_err, is_unique_violation, SqliteStore};
use crate::types::{Workspace, WorkspaceSummary};
use kbase_core::{
    authorize, now_millis, Action, Error, Principal, Resource, Result, VisibilityScope,
    GLOBAL_WORKSPACE_ID,
};

const WORKSPACE_COLUMNS: &str = "id, name, description, active, created_at";

impl SqliteStore {
    /// The single visibility function: own workspace plus the global pool.
    ///
    /// Fails with `UnknownWorkspace` when the principal's workspace id is not
    /// registered. A principal without a department sees only the global pool.
    pub fn resolve_visibility_scope(&self, principal: &Principal) -> Result<VisibilityScope> {
        match principal.workspace_id.as_deref() {
            None => Ok(VisibilityScope::new(None)),
            Some(id) => {
                if self.get_workspace(id)?.is_none() {
                    return Err(Error::UnknownWorkspace(id.to_string()));
                }
                Ok(VisibilityScope::new(Some(id.to_string())))
            }
        }
    }

    /// Admin operation: create a workspace with a fresh opaque id.
    pub fn create_workspace(
        &self,
        requester: &Principal,
        name: &str,
        description: Option<&str>,
    ) -> Result<Workspace> {
        authorize(requester, Action::ManageWorkspaces, Resource::none())?;
        let id = uuid::Uuid::new_v4().to_string();
        self.register_workspace(&id, name, description)
    }

    /// Insert a workspace under a caller-chosen id (provisioning, directory sync).
    pub fn register_workspace(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Workspace> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid("workspace name must not be empty"));
        }
        if id.is_empty() || id == GLOBAL_WORKSPACE_ID {
            return Err(Error::invalid(format!("workspace id '{}' is reserved", id)));
        }

        let ws = Workspace {
            id: id.to_string(),
            name: name.to_string(),
            description: description.map(String::from),
            active: true,
            created_at: now_millis(),
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO workspaces (id, name, description, active, created_at) \
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![ws.id, ws.name, ws.description, ws.created_at],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::invalid(format!("workspace '{}' already exists", name))
            } else {
                db_err(e)
            }
        })?;

        info!("Registered workspace {} ({})", ws.name, ws.id);
        Ok(ws)
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        self.conn()
            .prepare_cached(&format!(
                "SELECT {} FROM workspaces WHERE id = ?1",
                WORKSPACE_COLUMNS
            ))
            .map_err(db_err)?
            .query_row(params![id], row_to_workspace)
            .optional()
            .map_err(db_err)
    }

    /// Tenant workspaces (the global pool excluded) with their user counts.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT w.id, w.name, w.description, w.active, w.created_at, \
                        (SELECT COUNT(*) FROM users u WHERE u.department_id = w.id) \
                 FROM workspaces w \
                 WHERE w.id != ?1 \
                 ORDER BY w.created_at ASC, w.name ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![GLOBAL_WORKSPACE_ID], |row| {
                Ok(WorkspaceSummary {
                    workspace: row_to_workspace(row)?,
                    user_count: row.get(5)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Admin operation: soft-disable a workspace. Its documents stay readable,
    /// new uploads into it are refused.
    pub fn disable_workspace(&self, requester: &Principal, id: &str) -> Result<()> {
        authorize(requester, Action::ManageWorkspaces, Resource::none())?;
        if id == GLOBAL_WORKSPACE_ID {
            return Err(Error::invalid("the global workspace cannot be disabled"));
        }
        let changed = self
            .conn()
            .execute("UPDATE workspaces SET active = 0 WHERE id = ?1", params![id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::not_found(format!("workspace {}", id)));
        }
        info!("Disabled workspace {}", id);
        Ok(())
    }
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::sqlite::test_support::*;
    use kbase_core::{Error, Principal, Role};

    fn admin() -> Principal {
        Principal::new(1, Role::Admin, None)
    }

    #[test]
    fn test_scope_for_registered_workspace() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();

        let p = Principal::new(3, Role::Member, Some("hr".into()));
        let scope = store.resolve_visibility_scope(&p).unwrap();
        assert_eq!(scope.own_workspace_id.as_deref(), Some("hr"));
        assert!(scope.includes_global);
    }

    #[test]
    fn test_unknown_workspace_rejected() {
        let (store, _dir) = test_store();
        let p = Principal::new(3, Role::Member, Some("ghost".into()));
        let err = store.resolve_visibility_scope(&p).unwrap_err();
        assert!(matches!(err, Error::UnknownWorkspace(id) if id == "ghost"));
    }

    #[test]
    fn test_no_department_is_global_only() {
        let (store, _dir) = test_store();
        let scope = store.resolve_visibility_scope(&admin()).unwrap();
        assert!(scope.own_workspace_id.is_none());
        assert!(scope.admits("global", false));
        assert!(!scope.admits("hr", false));
    }

    #[test]
    fn test_create_requires_admin_and_unique_name() {
        let (store, _dir) = test_store();
        let ws = store.create_workspace(&admin(), "Finance", Some("money")).unwrap();
        assert_eq!(ws.name, "Finance");
        assert!(ws.active);

        let dup = store.create_workspace(&admin(), "Finance", None).unwrap_err();
        assert!(matches!(dup, Error::InvalidInput(_)));

        let editor = Principal::new(2, Role::Editor, Some(ws.id.clone()));
        let denied = store.create_workspace(&editor, "Legal", None).unwrap_err();
        assert!(matches!(denied, Error::Forbidden(_)));
    }

    #[test]
    fn test_get_workspace() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", Some("people")).unwrap();

        let ws = store.get_workspace("hr").unwrap().unwrap();
        assert_eq!(ws.name, "Human Resources");
        assert_eq!(ws.description.as_deref(), Some("people"));
        assert!(store.get_workspace("nope").unwrap().is_none());
    }

    #[test]
    fn test_reserved_id_refused() {
        let (store, _dir) = test_store();
        let err = store.register_workspace("global", "Another", None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_list_counts_users_and_hides_global() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();
        store.register_workspace("it", "IT", None).unwrap();
        seed_user(&store, "alice", Role::Member, Some("hr"));
        seed_user(&store, "bob", Role::Editor, Some("hr"));

        let list = store.list_workspaces().unwrap();
        assert_eq!(list.len(), 2);
        let hr = list.iter().find(|w| w.workspace.id == "hr").unwrap();
        assert_eq!(hr.user_count, 2);
        assert!(list.iter().all(|w| w.workspace.id != "global"));
    }

    #[test]
    fn test_disable_is_soft_and_global_is_protected() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();

        store.disable_workspace(&admin(), "hr").unwrap();
        assert!(!store.get_workspace("hr").unwrap().unwrap().active);

        let err = store.disable_workspace(&admin(), "global").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = store.disable_workspace(&admin(), "nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
