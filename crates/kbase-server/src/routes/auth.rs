//! Login, current user and password change.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::{check_password, hash_password_blocking, AuthUser, Credentials};
use crate::error::ApiResult;
use crate::state::AppState;
use kbase_core::{Error, IdentitySource, Principal};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
}

/// POST /api/auth/login: exchange credentials for a bearer token.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Json<Value>> {
    let principal = state.authenticator.authenticate(&credentials).await?;
    let token = state.jwt.issue(&principal)?;
    info!("User {} logged in", principal.user_id);

    Ok(Json(json!({
        "access_token": token,
        "token_type": "bearer",
        "user_info": user_info(&state, &principal)?,
    })))
}

/// GET /api/auth/me
async fn me(State(state): State<Arc<AppState>>, AuthUser(p): AuthUser) -> ApiResult<Json<Value>> {
    Ok(Json(user_info(&state, &p)?))
}

#[derive(Deserialize)]
struct ChangePassword {
    old_password: String,
    new_password: String,
}

/// POST /api/auth/change-password: local accounts only.
async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Json(req): Json<ChangePassword>,
) -> ApiResult<Json<Value>> {
    let user = state
        .store
        .get_user(p.user_id)?
        .ok_or_else(|| Error::not_found(format!("user {}", p.user_id)))?;
    let current = match user.identity {
        IdentitySource::Local { credential_hash } => credential_hash,
        IdentitySource::External { .. } => {
            return Err(Error::invalid("password is managed by the external directory").into());
        }
    };
    if req.new_password.is_empty() {
        return Err(Error::invalid("new password must not be empty").into());
    }
    if !check_password(&req.old_password, current).await? {
        return Err(Error::invalid("old password is incorrect").into());
    }

    let hash = hash_password_blocking(&req.new_password).await?;
    state.store.set_credential_hash(p.user_id, &hash)?;
    Ok(Json(json!({ "message": "password updated" })))
}

fn user_info(state: &AppState, p: &Principal) -> Result<Value, Error> {
    let user = state
        .store
        .get_user(p.user_id)?
        .ok_or_else(|| Error::not_found(format!("user {}", p.user_id)))?;
    let dept_name = match p.workspace_id.as_deref() {
        Some(id) => state.store.get_workspace(id)?.map(|w| w.name),
        None => None,
    };
    Ok(json!({
        "id": user.id,
        "name": user.username,
        "email": user.email,
        "role": p.role,
        "dept_id": p.workspace_id,
        "dept_name": dept_name,
    }))
}
