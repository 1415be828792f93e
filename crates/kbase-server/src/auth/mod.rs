//! Authentication: credential checks, bearer tokens and the request extractor.

pub mod jwt;
pub mod password;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;
use kbase_core::{Error, IdentitySource, Principal, Result};
use kbase_store::SqliteStore;

pub use jwt::{Claims, JwtService};
pub use password::{hash_password, verify_password};

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Turns credentials into a principal. Every failure is `Unauthorized`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal>;
}

/// Verifies argon2 hashes held in the user directory.
pub struct LocalAuthenticator {
    store: Arc<SqliteStore>,
}

impl LocalAuthenticator {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal> {
        let user = self
            .store
            .find_user_by_login(&credentials.username)?
            .ok_or(Error::Unauthorized)?;
        if !user.active {
            debug!("Login refused for inactive user {}", user.id);
            return Err(Error::Unauthorized);
        }
        let hash = match &user.identity {
            IdentitySource::Local { credential_hash } => credential_hash.clone(),
            IdentitySource::External { .. } => {
                debug!("User {} is directory-managed; local login refused", user.id);
                return Err(Error::Unauthorized);
            }
        };

        if !check_password(&credentials.password, hash).await? {
            return Err(Error::Unauthorized);
        }
        Ok(Principal::new(user.id, user.role, user.department_id))
    }
}

/// Argon2 off the async workers.
pub async fn check_password(password: &str, hash: String) -> Result<bool> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal(format!("password check aborted: {}", e)))?
}

pub async fn hash_password_blocking(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| Error::Internal(format!("password hashing aborted: {}", e)))?
}

/// The caller, re-resolved from the directory on every request so that
/// deactivation and role changes apply to tokens already issued.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(ApiError::unauthorized)?;

        let claims = state.jwt.verify(token).map_err(|_| ApiError::unauthorized())?;
        match state.store.principal_for(claims.sub) {
            Ok(principal) => Ok(AuthUser(principal)),
            Err(Error::NotFound(_)) => {
                warn!("Token for unknown or inactive user {}", claims.sub);
                Err(ApiError::unauthorized())
            }
            Err(e) => Err(e.into()),
        }
    }
}
