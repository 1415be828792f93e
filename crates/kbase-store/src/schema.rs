//! Database schema SQL.

/// Tenancy tables: workspaces and users. The global pool is seeded here.
pub const REGISTRY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

INSERT OR IGNORE INTO workspaces (id, name, description, active, created_at)
VALUES ('global', 'Global knowledge base', 'Visible to every workspace', 1, 0);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    username TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL DEFAULT 'local' CHECK (source IN ('local', 'external')),
    credential_hash TEXT,
    directory_ref TEXT,
    department_id TEXT REFERENCES workspaces(id),
    role TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('admin', 'editor', 'member')),
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_department ON users(department_id);
"#;

/// Document catalog. `scope_key` is 'global' for global documents, else the workspace id.
pub const DOCUMENT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id),
    is_global INTEGER NOT NULL DEFAULT 0,
    scope_key TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    locator TEXT NOT NULL,
    uploader_id INTEGER REFERENCES users(id),
    uploaded_at INTEGER NOT NULL,
    UNIQUE (scope_key, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id);
CREATE INDEX IF NOT EXISTS idx_documents_global ON documents(is_global);
CREATE INDEX IF NOT EXISTS idx_documents_uploaded ON documents(uploaded_at);
"#;

/// Vector index table. Scope columns are copied from the owning document.
pub const VECTOR_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS embedding_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    workspace_id TEXT NOT NULL,
    is_global INTEGER NOT NULL DEFAULT 0,
    chunk_index INTEGER NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    page INTEGER,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    scale REAL NOT NULL,
    offset_val REAL NOT NULL,
    dim INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON embedding_chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_scope ON embedding_chunks(workspace_id, is_global);
"#;

/// Session ledger. `seq` is the per-session creation ordinal.
pub const LEDGER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON chat_sessions(user_id, updated_at);

CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    content TEXT NOT NULL,
    sources_json TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    UNIQUE (session_id, seq)
);
"#;
