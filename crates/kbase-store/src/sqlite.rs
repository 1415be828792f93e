//! SQLite-backed metadata store: workspace registry, user directory, document
//! catalog, vector index and session ledger share one database file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use crate::schema::{DOCUMENT_SCHEMA_SQL, LEDGER_SCHEMA_SQL, REGISTRY_SCHEMA_SQL, VECTOR_SCHEMA_SQL};
use crate::types::StoreStats;
use kbase_core::{Error, Result};

/// Wait this long for a competing writer (another process on the same file).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    embedding_dim: usize,
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// Whether the error is a UNIQUE/PRIMARY KEY violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

impl SqliteStore {
    /// Open or create the store. The file will be `db_dir/kbase.db`.
    pub fn open(db_dir: impl AsRef<Path>, embedding_dim: usize) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("kbase.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
            embedding_dim,
        };

        let stats = store.stats()?;
        info!(
            "SqliteStore initialized: {} workspaces, {} documents, {} chunks, dim={}, path={}",
            stats.total_workspaces,
            stats.total_documents,
            stats.total_chunks,
            embedding_dim,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -65536;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!(
            "{}\n{}\n{}\n{}",
            REGISTRY_SCHEMA_SQL, DOCUMENT_SCHEMA_SQL, VECTOR_SCHEMA_SQL, LEDGER_SCHEMA_SQL
        );
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Run `f` inside a write transaction taken with `BEGIN IMMEDIATE`, so
    /// read-then-write sequences are serialized across processes too.
    pub(crate) fn write_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let out = f(&tx)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(db_err)
        };

        let stats = StoreStats {
            total_documents: count("SELECT COUNT(*) FROM documents")?,
            global_documents: count("SELECT COUNT(*) FROM documents WHERE is_global = 1")?,
            total_chunks: count("SELECT COUNT(*) FROM embedding_chunks")?,
            total_users: count("SELECT COUNT(*) FROM users")?,
            total_workspaces: count("SELECT COUNT(*) FROM workspaces")?,
            total_sessions: count("SELECT COUNT(*) FROM chat_sessions")?,
            embedding_dimension: self.embedding_dim,
            db_size_mb: 0.0,
        };
        drop(conn);

        let db_size = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
            ..stats
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;

    #[test]
    fn test_open_seeds_global_workspace() {
        let (store, _dir) = test_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_workspaces, 1);
        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.embedding_dimension, DIM);
        assert!(store.get_workspace("global").unwrap().is_some());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = super::SqliteStore::open(dir.path(), DIM).unwrap();
            store.register_workspace("hr", "Human Resources", None).unwrap();
        }
        let store = super::SqliteStore::open(dir.path(), DIM).unwrap();
        assert_eq!(store.stats().unwrap().total_workspaces, 2);
    }
}
