//! Resolver types.

use serde::{Deserialize, Serialize};

use kbase_store::{ChunkLocator, Citation};

/// A retrieved chunk joined with its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub document_id: i64,
    pub chunk_id: i64,
    pub filename: String,
    pub workspace_id: String,
    pub is_global: bool,
    pub locator: ChunkLocator,
    /// Cosine similarity, higher is closer.
    pub score: f64,
    pub snippet: String,
}

impl Passage {
    pub fn to_citation(&self) -> Citation {
        Citation {
            document_id: self.document_id,
            filename: self.filename.clone(),
            workspace_id: self.workspace_id.clone(),
            locator: self.locator,
            score: self.score,
            text_chunk: self.snippet.clone(),
        }
    }
}
