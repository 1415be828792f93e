//! Document catalog: conditional insert under the per-scope hash constraint,
//! scoped listings and transactional delete.

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::sqlite::{db_err, SqliteStore};
use crate::types::{ChunkInput, Document, DocumentListing, IngestOutcome, NewDocument};
use crate::vectors::{remove_chunks_tx, replace_chunks_tx};
use kbase_core::{scope_key, Result, VisibilityScope, GLOBAL_WORKSPACE_ID};

const DOCUMENT_COLUMNS: &str = "d.id, d.filename, d.size, d.content_type, d.workspace_id, \
                                d.is_global, d.content_hash, d.locator, d.uploader_id, d.uploaded_at";

/// SQL predicate over `{alias}.workspace_id` / `{alias}.is_global` for a scope.
/// The own workspace id binds to `?1`; a NULL binding matches nothing.
pub(crate) fn scope_predicate(alias: &str, scope: &VisibilityScope) -> String {
    if scope.includes_global {
        format!(
            "({a}.is_global = 1 OR {a}.workspace_id = '{g}' OR {a}.workspace_id = ?1)",
            a = alias,
            g = GLOBAL_WORKSPACE_ID
        )
    } else {
        format!("{}.workspace_id = ?1", alias)
    }
}

impl SqliteStore {
    /// Find a document by content hash within one dedup scope.
    pub fn find_document_by_hash(
        &self,
        scope_key: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        self.conn()
            .prepare_cached(&format!(
                "SELECT {} FROM documents d WHERE d.scope_key = ?1 AND d.content_hash = ?2",
                DOCUMENT_COLUMNS
            ))
            .map_err(db_err)?
            .query_row(params![scope_key, content_hash], row_to_document)
            .optional()
            .map_err(db_err)
    }

    /// Insert the document row and its chunks in one transaction.
    ///
    /// The row is inserted only if no document with the same hash exists in
    /// the same scope. The caller that loses that race gets the winner's id
    /// back as `Deduplicated` and none of its chunks are written.
    pub fn insert_document_with_chunks(
        &self,
        doc: &NewDocument,
        chunks: &[ChunkInput],
    ) -> Result<IngestOutcome> {
        let key = scope_key(&doc.workspace_id, doc.is_global).to_string();
        let dim = self.embedding_dim();

        let outcome = self.write_tx(|tx| {
            let inserted = tx
                .execute(
                    "INSERT INTO documents (filename, size, content_type, workspace_id, is_global, \
                                            scope_key, content_hash, locator, uploader_id, uploaded_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                     ON CONFLICT (scope_key, content_hash) DO NOTHING",
                    params![
                        doc.filename,
                        doc.size,
                        doc.content_type,
                        doc.workspace_id,
                        doc.is_global,
                        key,
                        doc.content_hash,
                        doc.locator,
                        doc.uploader_id,
                        kbase_core::now_millis()
                    ],
                )
                .map_err(db_err)?;

            if inserted == 0 {
                let existing: i64 = tx
                    .query_row(
                        "SELECT id FROM documents WHERE scope_key = ?1 AND content_hash = ?2",
                        params![key, doc.content_hash],
                        |row| row.get(0),
                    )
                    .map_err(db_err)?;
                return Ok(IngestOutcome::Deduplicated(existing));
            }

            let id = tx.last_insert_rowid();
            replace_chunks_tx(tx, id, &doc.workspace_id, doc.is_global, chunks, dim)?;
            Ok(IngestOutcome::Created(id))
        })?;

        match outcome {
            IngestOutcome::Created(id) => info!(
                "Stored document {} ({}) with {} chunks in scope {}",
                id,
                doc.filename,
                chunks.len(),
                key
            ),
            IngestOutcome::Deduplicated(id) => {
                debug!("Document {} already stored as {} in scope {}", doc.filename, id, key)
            }
        }
        Ok(outcome)
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        self.conn()
            .prepare_cached(&format!(
                "SELECT {} FROM documents d WHERE d.id = ?1",
                DOCUMENT_COLUMNS
            ))
            .map_err(db_err)?
            .query_row(params![id], row_to_document)
            .optional()
            .map_err(db_err)
    }

    /// Remove a document row and its chunks in one transaction.
    /// Returns the removed row, or `None` if it was already gone.
    pub fn delete_document(&self, id: i64) -> Result<Option<Document>> {
        self.write_tx(|tx| delete_document_tx(tx, id))
    }

    /// Documents visible under `scope`, newest upload first.
    pub fn list_documents(&self, scope: &VisibilityScope) -> Result<Vec<DocumentListing>> {
        self.query_listings(
            &format!("WHERE {}", scope_predicate("d", scope)),
            scope.own_workspace_id.clone(),
        )
    }

    /// Every document in every workspace, newest upload first.
    pub fn list_all_documents(&self) -> Result<Vec<DocumentListing>> {
        self.query_listings("WHERE ?1 IS NULL", None)
    }

    fn query_listings(
        &self,
        filter: &str,
        binding: Option<String>,
    ) -> Result<Vec<DocumentListing>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {}, w.name, u.username FROM documents d \
                 LEFT JOIN workspaces w ON w.id = d.workspace_id \
                 LEFT JOIN users u ON u.id = d.uploader_id \
                 {} \
                 ORDER BY d.uploaded_at DESC, d.id DESC",
                DOCUMENT_COLUMNS, filter
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![binding], |row| {
                Ok(DocumentListing {
                    document: row_to_document(row)?,
                    workspace_name: row.get(10)?,
                    uploader_name: row.get(11)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn count_chunks_for(&self, document_id: i64) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM embedding_chunks WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(db_err)
    }
}

fn delete_document_tx(tx: &Transaction<'_>, id: i64) -> Result<Option<Document>> {
    let doc = tx
        .query_row(
            &format!("SELECT {} FROM documents d WHERE d.id = ?1", DOCUMENT_COLUMNS),
            params![id],
            row_to_document,
        )
        .optional()
        .map_err(db_err)?;
    let Some(doc) = doc else {
        return Ok(None);
    };

    let chunks = remove_chunks_tx(tx, id)?;
    tx.execute("DELETE FROM documents WHERE id = ?1", params![id])
        .map_err(db_err)?;
    info!("Deleted document {} ({}) and {} chunks", id, doc.filename, chunks);
    Ok(Some(doc))
}

pub(crate) fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        size: row.get(2)?,
        content_type: row.get(3)?,
        workspace_id: row.get(4)?,
        is_global: row.get(5)?,
        content_hash: row.get(6)?,
        locator: row.get(7)?,
        uploader_id: row.get(8)?,
        uploaded_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_support::*;
    use crate::types::ChunkLocator;
    use kbase_core::Role;

    fn new_doc(ws: &str, is_global: bool, hash: &str, uploader: i64) -> NewDocument {
        NewDocument {
            filename: format!("{}.txt", hash),
            size: 11,
            content_type: Some("txt".into()),
            workspace_id: ws.into(),
            is_global,
            content_hash: hash.into(),
            locator: format!("{}/{}", scope_key(ws, is_global), hash),
            uploader_id: Some(uploader),
        }
    }

    fn chunk(text: &str, axis_idx: usize) -> ChunkInput {
        ChunkInput {
            text: text.into(),
            locator: ChunkLocator {
                chunk_index: 0,
                char_start: 0,
                char_end: text.chars().count() as i64,
                page: None,
            },
            embedding: axis(axis_idx),
        }
    }

    fn setup() -> (SqliteStore, tempfile::TempDir, i64) {
        let (store, dir) = test_store();
        store.register_workspace("hr", "Human Resources", None).unwrap();
        store.register_workspace("it", "IT", None).unwrap();
        let alice = seed_user(&store, "alice", Role::Member, Some("hr"));
        (store, dir, alice)
    }

    #[test]
    fn test_same_bytes_twice_in_scope_is_one_document() {
        let (store, _dir, alice) = setup();
        let doc = new_doc("hr", false, "abc", alice);

        let first = store.insert_document_with_chunks(&doc, &[chunk("hello world", 0)]).unwrap();
        let second = store.insert_document_with_chunks(&doc, &[chunk("hello world", 0)]).unwrap();

        assert!(first.is_created());
        assert_eq!(second, IngestOutcome::Deduplicated(first.document_id()));
        assert_eq!(store.stats().unwrap().total_documents, 1);
        assert_eq!(store.count_chunks_for(first.document_id()).unwrap(), 1);
    }

    #[test]
    fn test_same_bytes_in_other_workspace_is_independent() {
        let (store, _dir, alice) = setup();
        let a = store
            .insert_document_with_chunks(&new_doc("hr", false, "abc", alice), &[])
            .unwrap();
        let b = store
            .insert_document_with_chunks(&new_doc("it", false, "abc", alice), &[])
            .unwrap();
        let g = store
            .insert_document_with_chunks(&new_doc("hr", true, "abc", alice), &[])
            .unwrap();
        assert!(a.is_created() && b.is_created() && g.is_created());
        assert_ne!(a.document_id(), b.document_id());
        assert!(store.find_document_by_hash("global", "abc").unwrap().is_some());
    }

    #[test]
    fn test_listing_respects_scope() {
        let (store, _dir, alice) = setup();
        store.insert_document_with_chunks(&new_doc("hr", false, "h1", alice), &[]).unwrap();
        store.insert_document_with_chunks(&new_doc("it", false, "i1", alice), &[]).unwrap();
        store.insert_document_with_chunks(&new_doc("it", true, "g1", alice), &[]).unwrap();

        let scope = VisibilityScope::new(Some("hr".into()));
        let visible: Vec<String> = store
            .list_documents(&scope)
            .unwrap()
            .into_iter()
            .map(|l| l.document.content_hash)
            .collect();
        assert_eq!(visible.len(), 2);
        assert!(visible.contains(&"h1".to_string()));
        assert!(visible.contains(&"g1".to_string()));

        let all = store.list_all_documents().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].uploader_name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_delete_removes_row_and_chunks() {
        let (store, _dir, alice) = setup();
        let id = store
            .insert_document_with_chunks(
                &new_doc("hr", false, "abc", alice),
                &[chunk("one", 0), chunk("two", 1)],
            )
            .unwrap()
            .document_id();

        let removed = store.delete_document(id).unwrap().unwrap();
        assert_eq!(removed.id, id);
        assert!(store.get_document(id).unwrap().is_none());
        assert_eq!(store.count_chunks_for(id).unwrap(), 0);
        assert!(store.delete_document(id).unwrap().is_none());
    }

    #[test]
    fn test_bad_dimension_persists_nothing() {
        let (store, _dir, alice) = setup();
        let mut bad = chunk("bad", 0);
        bad.embedding = vec![1.0; DIM + 1];
        let err = store
            .insert_document_with_chunks(&new_doc("hr", false, "abc", alice), &[bad])
            .unwrap_err();
        assert!(matches!(err, kbase_core::Error::InvalidInput(_)));
        assert_eq!(store.stats().unwrap().total_documents, 0);
    }
}
