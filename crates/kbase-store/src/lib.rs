//! kbase store: workspace registry, user directory, document catalog,
//! quantized vector index and session ledger on one SQLite database.

pub mod documents;
pub mod embedding;
pub mod schema;
pub mod sessions;
pub mod sqlite;
pub mod types;
pub mod users;
pub mod vectors;
pub mod workspaces;

pub use sessions::DEFAULT_SESSION_TITLE;
pub use sqlite::SqliteStore;
pub use types::*;
pub use vectors::VectorIndex;
