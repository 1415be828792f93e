//! kbase server: REST transport over the knowledge-base services.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
