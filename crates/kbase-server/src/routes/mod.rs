//! HTTP route handlers.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod dashboard;
pub mod documents;
pub mod health;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(documents::routes())
        .merge(chat::routes())
        .merge(admin::routes())
        .merge(dashboard::routes())
}
