//! Workspace registry and user directory administration. Admin only.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{hash_password_blocking, AuthUser};
use crate::error::ApiResult;
use crate::state::AppState;
use kbase_core::{authorize, Action, Error, IdentitySource, Resource, Role};
use kbase_store::{NewUser, User, Workspace};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/workspaces", get(list_workspaces).post(create_workspace))
        .route("/admin/workspaces/{id}", delete(disable_workspace))
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/users/{id}", delete(deactivate_user))
}

async fn list_workspaces(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
) -> ApiResult<Json<Value>> {
    authorize(&p, Action::ManageWorkspaces, Resource::none())?;
    let workspaces = state.store.list_workspaces()?;
    Ok(Json(json!({ "workspaces": workspaces })))
}

#[derive(Deserialize)]
struct NewWorkspace {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_workspace(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Json(req): Json<NewWorkspace>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let ws = state
        .store
        .create_workspace(&p, &req.name, req.description.as_deref())?;
    Ok((StatusCode::CREATED, Json(ws)))
}

/// DELETE /api/admin/workspaces/{id}: soft disable; documents stay readable.
async fn disable_workspace(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.disable_workspace(&p, &id)?;
    Ok(Json(json!({ "disabled": id })))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
) -> ApiResult<Json<Value>> {
    authorize(&p, Action::ManageUsers, Resource::none())?;
    let users = state.store.list_users()?;
    Ok(Json(json!({ "users": users })))
}

/// A local account needs `password`; a directory account needs `directory_ref`.
#[derive(Deserialize)]
struct CreateUser {
    email: String,
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    directory_ref: Option<String>,
    role: String,
    #[serde(default)]
    department_id: Option<String>,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Json(req): Json<CreateUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    authorize(&p, Action::ManageUsers, Resource::none())?;
    let role: Role = req.role.parse()?;

    let identity = match (req.password.as_deref(), req.directory_ref) {
        (Some(password), None) if !password.is_empty() => IdentitySource::Local {
            credential_hash: hash_password_blocking(password).await?,
        },
        (None, Some(directory_ref)) if !directory_ref.trim().is_empty() => {
            IdentitySource::External { directory_ref }
        }
        _ => {
            return Err(
                Error::invalid("exactly one of 'password' or 'directory_ref' is required").into(),
            );
        }
    };

    let user = state.store.create_user(NewUser {
        email: req.email,
        username: req.username,
        identity,
        department_id: req.department_id.filter(|d| !d.is_empty()),
        role,
    })?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// DELETE /api/admin/users/{id}: deactivate; accounts are never purged.
async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.store.deactivate_user(&p, id)?;
    Ok(Json(json!({ "deactivated": id })))
}
