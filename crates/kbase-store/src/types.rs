//! Row types for workspaces, users, documents, chunks and chat history.

use serde::{Deserialize, Serialize};

use kbase_core::{IdentitySource, Role};

/// A tenant partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    pub created_at: i64,
}

/// Workspace row plus the number of users assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub user_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub identity: IdentitySource,
    pub department_id: Option<String>,
    pub role: Role,
    pub active: bool,
    pub created_at: i64,
}

/// User row joined with the department name for admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct UserListing {
    #[serde(flatten)]
    pub user: User,
    pub department_name: Option<String>,
}

/// Input for [`crate::SqliteStore::create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub identity: IdentitySource,
    pub department_id: Option<String>,
    pub role: Role,
}

/// A catalog entry for an ingested file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub workspace_id: String,
    pub is_global: bool,
    pub content_hash: String,
    /// Opaque object-storage key of the raw bytes.
    pub locator: String,
    pub uploader_id: Option<i64>,
    pub uploaded_at: i64,
}

/// Document row joined with display names for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListing {
    #[serde(flatten)]
    pub document: Document,
    pub workspace_name: Option<String>,
    pub uploader_name: Option<String>,
}

/// Input for [`crate::SqliteStore::insert_document_with_chunks`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub workspace_id: String,
    pub is_global: bool,
    pub content_hash: String,
    pub locator: String,
    pub uploader_id: Option<i64>,
}

/// Outcome of a document insert under the per-scope content-hash constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "document_id", rename_all = "snake_case")]
pub enum IngestOutcome {
    Created(i64),
    /// Identical bytes already exist in the same scope; carries the existing id.
    Deduplicated(i64),
}

impl IngestOutcome {
    pub fn document_id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::Deduplicated(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Position of a chunk inside its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocator {
    pub chunk_index: i64,
    pub char_start: i64,
    pub char_end: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
}

/// A chunk ready for indexing.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub text: String,
    pub locator: ChunkLocator,
    pub embedding: Vec<f32>,
}

/// A vector-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub workspace_id: String,
    pub is_global: bool,
    pub text: String,
    pub locator: ChunkLocator,
    pub score: f64,
    /// Upload time of the owning document; 0 if the document is gone.
    pub uploaded_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub(crate) fn from_column(s: &str) -> Self {
        if s == "assistant" {
            Self::Assistant
        } else {
            Self::User
        }
    }
}

/// Source reference attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: i64,
    pub filename: String,
    pub workspace_id: String,
    pub locator: ChunkLocator,
    pub score: f64,
    pub text_chunk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: i64,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub sources: Vec<Citation>,
    pub created_at: i64,
}

/// Counts shown on the admin dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_documents: i64,
    pub global_documents: i64,
    pub total_chunks: i64,
    pub total_users: i64,
    pub total_workspaces: i64,
    pub total_sessions: i64,
    pub embedding_dimension: usize,
    pub db_size_mb: f64,
}
