//! User directory.

use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::sqlite::{db_err, is_unique_violation, SqliteStore};
use crate::types::{NewUser, User, UserListing};
use kbase_core::{
    authorize, now_millis, Action, Error, IdentitySource, Principal, Resource, Result, Role,
};

const USER_COLUMNS: &str = "u.id, u.email, u.username, u.source, u.credential_hash, \
                            u.directory_ref, u.department_id, u.role, u.active, u.created_at";

impl SqliteStore {
    /// Insert a user. Duplicate email/username and unknown departments are `InvalidInput`.
    pub fn create_user(&self, new: NewUser) -> Result<User> {
        let email = new.email.trim().to_lowercase();
        let username = new.username.trim().to_string();
        if email.is_empty() || username.is_empty() {
            return Err(Error::invalid("email and username are required"));
        }
        if let Some(dept) = new.department_id.as_deref() {
            if self.get_workspace(dept)?.is_none() {
                return Err(Error::UnknownWorkspace(dept.to_string()));
            }
        }

        let (credential_hash, directory_ref) = match &new.identity {
            IdentitySource::Local { credential_hash } => (Some(credential_hash.as_str()), None),
            IdentitySource::External { directory_ref } => (None, Some(directory_ref.as_str())),
        };
        let created_at = now_millis();

        let id = self
            .conn()
            .prepare_cached(
                "INSERT INTO users (email, username, source, credential_hash, directory_ref, \
                                    department_id, role, active, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            )
            .map_err(db_err)?
            .insert(params![
                email,
                username,
                new.identity.kind(),
                credential_hash,
                directory_ref,
                new.department_id,
                new.role.as_str(),
                created_at
            ])
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::invalid(format!("user '{}' or '{}' already exists", username, email))
                } else {
                    db_err(e)
                }
            })?;

        info!("Created {} user {} ({})", new.role, username, new.identity.kind());
        Ok(User {
            id,
            email,
            username,
            identity: new.identity,
            department_id: new.department_id,
            role: new.role,
            active: true,
            created_at,
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn()
            .prepare_cached(&format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS))
            .map_err(db_err)?
            .query_row(params![id], row_to_user)
            .optional()
            .map_err(db_err)
    }

    /// Look a user up by email, falling back to username. An email match
    /// wins when one user's username equals another's email.
    pub fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.conn()
            .prepare_cached(&format!(
                "SELECT {} FROM users u WHERE u.email = lower(?1) OR u.username = ?1 \
                 ORDER BY (u.email = lower(?1)) DESC LIMIT 1",
                USER_COLUMNS
            ))
            .map_err(db_err)?
            .query_row(params![login.trim()], row_to_user)
            .optional()
            .map_err(db_err)
    }

    /// All users, ordered by role, department, newest first.
    pub fn list_users(&self) -> Result<Vec<UserListing>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {}, w.name FROM users u \
                 LEFT JOIN workspaces w ON w.id = u.department_id \
                 ORDER BY u.role ASC, u.department_id ASC, u.created_at DESC, u.id DESC",
                USER_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserListing {
                    user: row_to_user(row)?,
                    department_name: row.get(10)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Admin operation: mark a user inactive. Users are never purged.
    pub fn deactivate_user(&self, requester: &Principal, id: i64) -> Result<()> {
        authorize(requester, Action::ManageUsers, Resource::none())?;
        if requester.user_id == id {
            return Err(Error::invalid("cannot deactivate your own account"));
        }
        let changed = self
            .conn()
            .execute("UPDATE users SET active = 0 WHERE id = ?1", params![id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::not_found(format!("user {}", id)));
        }
        info!("Deactivated user {}", id);
        Ok(())
    }

    /// Replace a local user's credential hash. External identities have none.
    pub fn set_credential_hash(&self, id: i64, credential_hash: &str) -> Result<()> {
        let user = self
            .get_user(id)?
            .ok_or_else(|| Error::not_found(format!("user {}", id)))?;
        if !matches!(user.identity, IdentitySource::Local { .. }) {
            return Err(Error::invalid("externally managed accounts have no local password"));
        }
        self.conn()
            .execute(
                "UPDATE users SET credential_hash = ?1 WHERE id = ?2",
                params![credential_hash, id],
            )
            .map_err(db_err)?;
        info!("Updated credentials for user {}", id);
        Ok(())
    }

    /// Build the principal for an active user.
    pub fn principal_for(&self, user_id: i64) -> Result<Principal> {
        match self.get_user(user_id)? {
            Some(user) if user.active => {
                Ok(Principal::new(user.id, user.role, user.department_id))
            }
            _ => Err(Error::not_found(format!("user {}", user_id))),
        }
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let source: String = row.get(3)?;
    let identity = if source == "external" {
        IdentitySource::External {
            directory_ref: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        }
    } else {
        IdentitySource::Local {
            credential_hash: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        }
    };
    let role: String = row.get(7)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        identity,
        department_id: row.get(6)?,
        // The column CHECK constraint admits only known roles.
        role: role.parse().unwrap_or(Role::Member),
        active: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::sqlite::test_support::*;
    use crate::types::NewUser;
    use kbase_core::{Error, IdentitySource, Principal, Role};

    #[test]
    fn test_create_and_find_by_email_or_username() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();
        let id = seed_user(&store, "alice", Role::Member, Some("hr"));

        let by_name = store.find_user_by_login("alice").unwrap().unwrap();
        let by_mail = store.find_user_by_login("Alice@Example.com").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_mail.id, id);
        assert_eq!(by_name.identity.kind(), "local");
        assert!(store.find_user_by_login("carol").unwrap().is_none());
    }

    #[test]
    fn test_email_match_beats_username_match() {
        let (store, _dir) = test_store();
        let owner = seed_user(&store, "alice", Role::Member, None);
        let squatter = store
            .create_user(NewUser {
                email: "mallory@example.com".into(),
                username: "alice@example.com".into(),
                identity: IdentitySource::Local {
                    credential_hash: "x".into(),
                },
                department_id: None,
                role: Role::Member,
            })
            .unwrap();

        assert_eq!(store.find_user_by_login("alice@example.com").unwrap().unwrap().id, owner);
        assert_eq!(store.find_user_by_login("mallory@example.com").unwrap().unwrap().id, squatter.id);
    }

    #[test]
    fn test_duplicate_and_unknown_department() {
        let (store, _dir) = test_store();
        seed_user(&store, "alice", Role::Member, None);

        let dup = store
            .create_user(NewUser {
                email: "alice@example.com".into(),
                username: "alice2".into(),
                identity: IdentitySource::Local {
                    credential_hash: "h".into(),
                },
                department_id: None,
                role: Role::Member,
            })
            .unwrap_err();
        assert!(matches!(dup, Error::InvalidInput(_)));

        let ghost = store
            .create_user(NewUser {
                email: "bob@example.com".into(),
                username: "bob".into(),
                identity: IdentitySource::External {
                    directory_ref: "uid=bob,ou=people".into(),
                },
                department_id: Some("ghost".into()),
                role: Role::Member,
            })
            .unwrap_err();
        assert!(matches!(ghost, Error::UnknownWorkspace(_)));
    }

    #[test]
    fn test_external_identity_has_no_credential() {
        let (store, _dir) = test_store();
        let user = store
            .create_user(NewUser {
                email: "dave@example.com".into(),
                username: "dave".into(),
                identity: IdentitySource::External {
                    directory_ref: "uid=dave,ou=people".into(),
                },
                department_id: None,
                role: Role::Member,
            })
            .unwrap();
        let loaded = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(
            loaded.identity,
            IdentitySource::External {
                directory_ref: "uid=dave,ou=people".into()
            }
        );
        let err = store.set_credential_hash(user.id, "$argon2id$x").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_set_credential_hash() {
        let (store, _dir) = test_store();
        let id = seed_user(&store, "erin", Role::Member, None);
        store.set_credential_hash(id, "new-hash").unwrap();
        assert_eq!(
            store.get_user(id).unwrap().unwrap().identity,
            IdentitySource::Local {
                credential_hash: "new-hash".into()
            }
        );
        assert!(matches!(store.set_credential_hash(999, "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_deactivate_blocks_principal() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();
        let admin_id = seed_user(&store, "root", Role::Admin, None);
        let alice = seed_user(&store, "alice", Role::Member, Some("hr"));
        let admin = store.principal_for(admin_id).unwrap();

        let p = store.principal_for(alice).unwrap();
        assert_eq!(p, Principal::new(alice, Role::Member, Some("hr".into())));

        let own = store.deactivate_user(&admin, admin_id).unwrap_err();
        assert!(matches!(own, Error::InvalidInput(_)));

        store.deactivate_user(&admin, alice).unwrap();
        assert!(matches!(store.principal_for(alice), Err(Error::NotFound(_))));
        assert!(!store.get_user(alice).unwrap().unwrap().active);
    }

    #[test]
    fn test_list_orders_by_role() {
        let (store, _dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();
        seed_user(&store, "mia", Role::Member, Some("hr"));
        seed_user(&store, "root", Role::Admin, None);

        let users = store.list_users().unwrap();
        assert_eq!(users[0].user.role, Role::Admin);
        assert_eq!(users[1].department_name.as_deref(), Some("Human Resources"));
    }
}
