//! Capability checks. Every role-based decision in kbase goes through [`authorize`].

use crate::error::{Error, Result};
use crate::identity::{Principal, Role};

/// Something a principal wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UploadDocument,
    UploadGlobalDocument,
    DeleteDocument,
    ReindexDocument,
    ListAllDocuments,
    ManageWorkspaces,
    ManageUsers,
    DeleteSession,
    ReadSession,
}

/// Ownership facts about the resource an action targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resource<'a> {
    /// Workspace the resource belongs to.
    pub workspace_id: Option<&'a str>,
    /// User who created the resource.
    pub owner_id: Option<i64>,
}

impl<'a> Resource<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn owned_by(owner_id: i64) -> Self {
        Self {
            workspace_id: None,
            owner_id: Some(owner_id),
        }
    }

    pub fn document(workspace_id: &'a str, uploader_id: Option<i64>) -> Self {
        Self {
            workspace_id: Some(workspace_id),
            owner_id: uploader_id,
        }
    }
}

/// Check `(role, action, resource owner)`. Returns `Forbidden` on denial.
pub fn authorize(principal: &Principal, action: Action, resource: Resource<'_>) -> Result<()> {
    if is_allowed(principal, action, resource) {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "{} may not {:?}",
            principal.role, action
        )))
    }
}

fn is_allowed(principal: &Principal, action: Action, resource: Resource<'_>) -> bool {
    let same_workspace = match (resource.workspace_id, principal.workspace_id.as_deref()) {
        (Some(res), Some(own)) => res == own,
        _ => false,
    };
    let is_owner = resource.owner_id == Some(principal.user_id);

    match action {
        // Sessions are private regardless of role.
        Action::DeleteSession | Action::ReadSession => is_owner,
        // Needs a department; checked where the target workspace is resolved.
        Action::UploadDocument => true,
        Action::UploadGlobalDocument => matches!(principal.role, Role::Admin | Role::Editor),
        Action::DeleteDocument | Action::ReindexDocument => match principal.role {
            Role::Admin => true,
            Role::Editor => same_workspace,
            Role::Member => same_workspace && is_owner,
        },
        Action::ListAllDocuments | Action::ManageWorkspaces | Action::ManageUsers => {
            principal.role == Role::Admin
        }
    }
}
