//! kbase core: error taxonomy, configuration, principals and capability checks.

pub mod access;
pub mod config;
pub mod error;
pub mod identity;

pub use access::{authorize, Action, Resource};
pub use config::{DataPaths, KbaseConfig};
pub use error::{Error, Result};
pub use identity::{
    scope_key, IdentitySource, Principal, Role, VisibilityScope, GLOBAL_WORKSPACE_ID,
};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
