//! Retrieval resolver: scope → embed → vector search → document join.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::types::Passage;
use kbase_core::{Error, Principal, Result};
use kbase_infer::Embedder;
use kbase_store::{Document, SqliteStore, VectorIndex};

pub struct Resolver {
    store: Arc<SqliteStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Resolver {
    pub fn new(
        store: Arc<SqliteStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
        }
    }

    /// Up to `top_k` passages visible to `principal`, most relevant first.
    ///
    /// Chunks whose document disappeared between search and join are dropped,
    /// so the result may hold fewer than `top_k` passages.
    pub async fn retrieve(
        &self,
        query: &str,
        principal: &Principal,
        top_k: usize,
    ) -> Result<Vec<Passage>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid("query must not be empty"));
        }
        let scope = self.store.resolve_visibility_scope(principal)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, &scope, top_k)?;

        let mut documents: HashMap<i64, Option<Document>> = HashMap::new();
        let mut passages = Vec::with_capacity(hits.len());
        for hit in hits {
            if !documents.contains_key(&hit.document_id) {
                documents.insert(hit.document_id, self.store.get_document(hit.document_id)?);
            }
            let Some(Some(doc)) = documents.get(&hit.document_id) else {
                debug!("Dropping chunk {} of deleted document {}", hit.chunk_id, hit.document_id);
                continue;
            };
            if !scope.admits(&doc.workspace_id, doc.is_global) {
                continue;
            }
            passages.push(Passage {
                document_id: doc.id,
                chunk_id: hit.chunk_id,
                filename: doc.filename.clone(),
                workspace_id: doc.workspace_id.clone(),
                is_global: doc.is_global,
                locator: hit.locator,
                score: hit.score,
                snippet: hit.text,
            });
        }

        debug!(
            "Resolved {} passages for user {} (scope {:?})",
            passages.len(),
            principal.user_id,
            scope.own_workspace_id
        );
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_core::{Role, VisibilityScope};
    use kbase_infer::HashingEmbedder;
    use kbase_store::{ChunkHit, ChunkInput, ChunkLocator, NewDocument};
    use tempfile::TempDir;

    const DIM: usize = 128;

    fn setup() -> (Arc<SqliteStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path(), DIM).unwrap());
        store.register_workspace("hr", "HR", None).unwrap();
        store.register_workspace("it", "IT", None).unwrap();
        (store, dir)
    }

    fn add_doc(store: &SqliteStore, name: &str, ws: &str, global: bool, text: &str) -> i64 {
        let embedder = HashingEmbedder::new(DIM);
        let chunk = ChunkInput {
            text: text.to_string(),
            locator: ChunkLocator {
                chunk_index: 0,
                char_start: 0,
                char_end: text.chars().count() as i64,
                page: None,
            },
            embedding: embedder.embed_sync(text),
        };
        store
            .insert_document_with_chunks(
                &NewDocument {
                    filename: name.into(),
                    size: text.len() as i64,
                    content_type: Some("txt".into()),
                    workspace_id: ws.into(),
                    is_global: global,
                    content_hash: format!("hash-{}", name),
                    locator: format!("{}/{}", ws, name),
                    uploader_id: None,
                },
                &[chunk],
            )
            .unwrap()
            .document_id()
    }

    fn resolver(store: &Arc<SqliteStore>) -> Resolver {
        Resolver::new(store.clone(), store.clone(), Arc::new(HashingEmbedder::new(DIM)))
    }

    #[tokio::test]
    async fn test_workspace_isolation_and_global_visibility() {
        let (store, _dir) = setup();
        add_doc(&store, "hr.txt", "hr", false, "annual leave is 20 days for HR staff");
        let it_doc = add_doc(&store, "it.txt", "it", false, "annual leave for IT is 25 days");
        let global = add_doc(&store, "all.txt", "global", true, "company annual leave calendar");

        let alice = Principal::new(1, Role::Member, Some("hr".into()));
        let passages = resolver(&store).retrieve("annual leave", &alice, 10).await.unwrap();

        assert!(passages.iter().all(|p| p.document_id != it_doc));
        assert!(passages.iter().any(|p| p.document_id == global));
        assert!(passages.iter().all(|p| p.workspace_id == "hr" || p.is_global));
        for pair in passages.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_deterministic() {
        let (store, _dir) = setup();
        add_doc(&store, "a.txt", "hr", false, "expense claims within 30 days");
        add_doc(&store, "b.txt", "hr", false, "expense policy for travel");
        let alice = Principal::new(1, Role::Member, Some("hr".into()));
        let r = resolver(&store);
        let first = r.retrieve("expense", &alice, 5).await.unwrap();
        let second = r.retrieve("expense", &alice, 5).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_query_and_unknown_workspace() {
        let (store, _dir) = setup();
        let alice = Principal::new(1, Role::Member, Some("hr".into()));
        let err = resolver(&store).retrieve("   ", &alice, 5).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let ghost = Principal::new(2, Role::Member, Some("nowhere".into()));
        let err = resolver(&store).retrieve("leave", &ghost, 5).await.unwrap_err();
        assert!(matches!(err, Error::UnknownWorkspace(_)));
    }

    /// Index that reports a chunk of a document the catalog no longer has.
    struct StaleIndex;

    impl VectorIndex for StaleIndex {
        fn index(&self, _: i64, _: &str, _: bool, chunks: &[ChunkInput]) -> Result<usize> {
            Ok(chunks.len())
        }

        fn search(&self, _: &[f32], _: &VisibilityScope, _: usize) -> Result<Vec<ChunkHit>> {
            Ok(vec![ChunkHit {
                chunk_id: 99,
                document_id: 4242,
                workspace_id: "hr".into(),
                is_global: false,
                text: "stale".into(),
                locator: ChunkLocator {
                    chunk_index: 0,
                    char_start: 0,
                    char_end: 5,
                    page: None,
                },
                score: 0.9,
                uploaded_at: 0,
            }])
        }

        fn remove(&self, _: i64) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_drops_chunks_of_deleted_documents() {
        let (store, _dir) = setup();
        let r = Resolver::new(store.clone(), Arc::new(StaleIndex), Arc::new(HashingEmbedder::new(DIM)));
        let alice = Principal::new(1, Role::Member, Some("hr".into()));
        assert!(r.retrieve("anything", &alice, 5).await.unwrap().is_empty());
    }
}
