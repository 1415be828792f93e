//! Document ingestion pipeline: upload → text → chunks → vectors → catalog.
//!
//! A document row exists only once its bytes are stored and every chunk is
//! embedded; the row and its chunks are written in one transaction.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunking::RecursiveChunker;
use crate::file::{self, ExtractedText, FileType};
use crate::storage::ObjectStorage;
use kbase_core::{
    authorize, scope_key, Action, Error, Principal, Resource, Result, GLOBAL_WORKSPACE_ID,
};
use kbase_infer::Embedder;
use kbase_store::{
    ChunkInput, ChunkLocator, Document, DocumentListing, IngestOutcome, NewDocument, SqliteStore,
    VectorIndex,
};

/// An uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// SHA-256 hex of raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// The document store service.
pub struct Ingester {
    store: Arc<SqliteStore>,
    storage: Arc<dyn ObjectStorage>,
    embedder: Arc<dyn Embedder>,
    chunker: RecursiveChunker,
}

impl Ingester {
    pub fn new(
        store: Arc<SqliteStore>,
        storage: Arc<dyn ObjectStorage>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            storage,
            embedder,
            chunker: RecursiveChunker::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: RecursiveChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Ingest an upload into the principal's workspace or the global pool.
    pub async fn ingest(
        &self,
        principal: &Principal,
        upload: Upload,
        is_global: bool,
    ) -> Result<IngestOutcome> {
        let action = if is_global {
            Action::UploadGlobalDocument
        } else {
            Action::UploadDocument
        };
        authorize(principal, action, Resource::none())?;
        self.ensure_active_user(principal)?;

        let scope = self.store.resolve_visibility_scope(principal)?;
        let workspace_id = if is_global {
            GLOBAL_WORKSPACE_ID.to_string()
        } else {
            let own = scope.own_workspace_id.ok_or_else(|| {
                Error::invalid("uploader has no department; upload as global instead")
            })?;
            let active = self.store.get_workspace(&own)?.map(|ws| ws.active);
            if active != Some(true) {
                return Err(Error::forbidden(format!("workspace {} is disabled", own)));
            }
            own
        };

        let filename = clean_filename(&upload.filename)?;
        let Upload { bytes, .. } = upload;
        if bytes.is_empty() {
            return Err(Error::invalid("empty upload"));
        }

        let (bytes, extracted) = extract_blocking(filename.clone(), bytes).await?;
        let hash = content_hash(&bytes);
        let key = scope_key(&workspace_id, is_global).to_string();

        if let Some(existing) = self.store.find_document_by_hash(&key, &hash)? {
            debug!("{} matches document {} in scope {}", filename, existing.id, key);
            return Ok(IngestOutcome::Deduplicated(existing.id));
        }

        let locator = self.storage.store(&key, &hash, &bytes).await?;
        let chunks = match self.embed_chunks(&extracted).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.discard_object(&locator).await;
                return Err(e);
            }
        };

        let doc = NewDocument {
            content_type: Some(FileType::from_filename(&filename).mime_type().to_string()),
            filename,
            size: bytes.len() as i64,
            workspace_id,
            is_global,
            content_hash: hash,
            locator: locator.clone(),
            uploader_id: Some(principal.user_id),
        };
        let outcome = match self.store.insert_document_with_chunks(&doc, &chunks) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_object(&locator).await;
                return Err(e);
            }
        };
        if let IngestOutcome::Deduplicated(winner) = outcome {
            debug!("Concurrent upload {} won scope {}; dropping {}", winner, key, locator);
            self.discard_object(&locator).await;
        }
        Ok(outcome)
    }

    /// Delete a document, its chunks and (best-effort) its stored bytes.
    pub async fn delete(&self, principal: &Principal, document_id: i64) -> Result<Document> {
        let doc = self
            .store
            .get_document(document_id)?
            .ok_or_else(|| Error::not_found(format!("document {}", document_id)))?;
        authorize(
            principal,
            Action::DeleteDocument,
            Resource::document(&doc.workspace_id, doc.uploader_id),
        )?;

        let removed = self
            .store
            .delete_document(document_id)?
            .ok_or_else(|| Error::not_found(format!("document {}", document_id)))?;

        if let Err(e) = self.storage.delete(&removed.locator).await {
            warn!("Document {} deleted but object {} remains: {}", document_id, removed.locator, e);
        }
        info!("Deleted document {} ({})", document_id, removed.filename);
        Ok(removed)
    }

    /// Documents visible to the principal, newest first.
    pub fn list(&self, principal: &Principal) -> Result<Vec<DocumentListing>> {
        let scope = self.store.resolve_visibility_scope(principal)?;
        self.store.list_documents(&scope)
    }

    /// Every document in every workspace. Admin only.
    pub fn list_all(&self, principal: &Principal) -> Result<Vec<DocumentListing>> {
        authorize(principal, Action::ListAllDocuments, Resource::none())?;
        self.store.list_all_documents()
    }

    /// Stored bytes of a visible document. Invisible documents are `NotFound`.
    pub async fn fetch(&self, principal: &Principal, document_id: i64) -> Result<(Document, Vec<u8>)> {
        let doc = self.visible_document(principal, document_id)?;
        let bytes = self.storage.fetch(&doc.locator).await?;
        Ok((doc, bytes))
    }

    /// Re-extract, re-embed and atomically replace a document's chunks.
    pub async fn reindex(&self, principal: &Principal, document_id: i64) -> Result<usize> {
        let doc = self.visible_document(principal, document_id)?;
        authorize(
            principal,
            Action::ReindexDocument,
            Resource::document(&doc.workspace_id, doc.uploader_id),
        )?;

        let bytes = self.storage.fetch(&doc.locator).await?;
        let (_, extracted) = extract_blocking(doc.filename.clone(), bytes).await?;
        let chunks = self.embed_chunks(&extracted).await?;

        if self.store.get_document(document_id)?.is_none() {
            return Err(Error::not_found(format!("document {}", document_id)));
        }
        let n = self
            .store
            .index(document_id, &doc.workspace_id, doc.is_global, &chunks)?;
        info!("Re-indexed document {} ({} chunks)", document_id, n);
        Ok(n)
    }

    fn ensure_active_user(&self, principal: &Principal) -> Result<()> {
        match self.store.get_user(principal.user_id)? {
            Some(user) if user.active => Ok(()),
            Some(_) => Err(Error::forbidden("user is deactivated")),
            None => Err(Error::not_found(format!("user {}", principal.user_id))),
        }
    }

    fn visible_document(&self, principal: &Principal, document_id: i64) -> Result<Document> {
        let scope = self.store.resolve_visibility_scope(principal)?;
        match self.store.get_document(document_id)? {
            Some(doc) if principal.is_admin() || scope.admits(&doc.workspace_id, doc.is_global) => {
                Ok(doc)
            }
            _ => Err(Error::not_found(format!("document {}", document_id))),
        }
    }

    async fn embed_chunks(&self, extracted: &ExtractedText) -> Result<Vec<ChunkInput>> {
        let pieces = self.chunker.chunk(&extracted.text);
        let texts: Vec<String> = pieces.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != pieces.len() {
            return Err(Error::upstream(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                pieces.len()
            )));
        }

        Ok(pieces
            .into_iter()
            .zip(vectors)
            .map(|(c, embedding)| ChunkInput {
                locator: ChunkLocator {
                    chunk_index: c.chunk_index as i64,
                    char_start: c.char_start as i64,
                    char_end: c.char_end as i64,
                    page: extracted.page_of(c.char_start),
                },
                text: c.text,
                embedding,
            })
            .collect())
    }

    /// Remove bytes written by an ingest that did not commit. Locators are
    /// unique per attempt, so nothing else can reference them.
    async fn discard_object(&self, locator: &str) {
        if let Err(e) = self.storage.delete(locator).await {
            warn!("Could not remove orphaned object {}: {}", locator, e);
        }
    }
}

fn clean_filename(raw: &str) -> Result<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() {
        return Err(Error::invalid("filename must not be empty"));
    }
    Ok(name.to_string())
}

/// Text extraction is CPU-bound (PDF parsing); run it off the async workers.
async fn extract_blocking(filename: String, bytes: Vec<u8>) -> Result<(Vec<u8>, ExtractedText)> {
    let (bytes, extracted) = tokio::task::spawn_blocking(move || {
        let extracted = file::extract_text(&filename, &bytes);
        (bytes, extracted)
    })
    .await
    .map_err(|e| Error::Internal(format!("extraction task failed: {}", e)))?;
    Ok((bytes, extracted?))
}
