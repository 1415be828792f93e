//! Vector index over quantized chunk embeddings.

use std::cmp::Ordering;

use ndarray::Array1;
use rusqlite::{params, Transaction};
use tracing::{debug, warn};

use crate::documents::scope_predicate;
use crate::embedding::{dequantize_uint8, normalized, quantize_uint8};
use crate::sqlite::{db_err, SqliteStore};
use crate::types::{ChunkHit, ChunkInput, ChunkLocator};
use kbase_core::{Error, Result, VisibilityScope};

/// Chunk-level similarity index partitioned by workspace visibility.
pub trait VectorIndex: Send + Sync {
    /// Atomically replace every chunk of `document_id`. Returns the chunk count.
    fn index(
        &self,
        document_id: i64,
        workspace_id: &str,
        is_global: bool,
        chunks: &[ChunkInput],
    ) -> Result<usize>;

    /// Up to `top_k` chunks visible under `scope`, most similar first.
    ///
    /// Ties break on document upload time (newer first), then chunk id.
    fn search(&self, query: &[f32], scope: &VisibilityScope, top_k: usize)
        -> Result<Vec<ChunkHit>>;

    /// Drop every chunk of `document_id`. Idempotent.
    fn remove(&self, document_id: i64) -> Result<usize>;
}

pub(crate) fn replace_chunks_tx(
    tx: &Transaction<'_>,
    document_id: i64,
    workspace_id: &str,
    is_global: bool,
    chunks: &[ChunkInput],
    dim: usize,
) -> Result<usize> {
    remove_chunks_tx(tx, document_id)?;

    let mut stmt = tx
        .prepare_cached(
            "INSERT INTO embedding_chunks (document_id, workspace_id, is_global, chunk_index, \
                                           char_start, char_end, page, text, embedding, \
                                           scale, offset_val, dim) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .map_err(db_err)?;

    for chunk in chunks {
        if chunk.embedding.len() != dim {
            return Err(Error::invalid(format!(
                "embedding dimension {} does not match index dimension {}",
                chunk.embedding.len(),
                dim
            )));
        }
        let (bytes, scale, offset) = quantize_uint8(&chunk.embedding);
        stmt.execute(params![
            document_id,
            workspace_id,
            is_global,
            chunk.locator.chunk_index,
            chunk.locator.char_start,
            chunk.locator.char_end,
            chunk.locator.page,
            chunk.text,
            bytes,
            scale as f64,
            offset as f64,
            dim as i64
        ])
        .map_err(db_err)?;
    }
    Ok(chunks.len())
}

pub(crate) fn remove_chunks_tx(tx: &Transaction<'_>, document_id: i64) -> Result<usize> {
    tx.execute(
        "DELETE FROM embedding_chunks WHERE document_id = ?1",
        params![document_id],
    )
    .map_err(db_err)
}

impl VectorIndex for SqliteStore {
    fn index(
        &self,
        document_id: i64,
        workspace_id: &str,
        is_global: bool,
        chunks: &[ChunkInput],
    ) -> Result<usize> {
        let dim = self.embedding_dim();
        let n = self.write_tx(|tx| {
            replace_chunks_tx(tx, document_id, workspace_id, is_global, chunks, dim)
        })?;
        debug!("Indexed {} chunks for document {}", n, document_id);
        Ok(n)
    }

    fn search(
        &self,
        query: &[f32],
        scope: &VisibilityScope,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(q) = normalized(Array1::from(query.to_vec()).view()) else {
            return Ok(Vec::new());
        };

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT c.id, c.document_id, c.workspace_id, c.is_global, c.text, \
                        c.chunk_index, c.char_start, c.char_end, c.page, \
                        c.embedding, c.scale, c.offset_val, c.dim, \
                        COALESCE(d.uploaded_at, 0) \
                 FROM embedding_chunks c \
                 LEFT JOIN documents d ON d.id = c.document_id \
                 WHERE {}",
                scope_predicate("c", scope)
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![scope.own_workspace_id], |row| {
                let blob: Vec<u8> = row.get(9)?;
                let scale: f64 = row.get(10)?;
                let offset: f64 = row.get(11)?;
                let dim: i64 = row.get(12)?;
                let hit = ChunkHit {
                    chunk_id: row.get(0)?,
                    document_id: row.get(1)?,
                    workspace_id: row.get(2)?,
                    is_global: row.get(3)?,
                    text: row.get(4)?,
                    locator: ChunkLocator {
                        chunk_index: row.get(5)?,
                        char_start: row.get(6)?,
                        char_end: row.get(7)?,
                        page: row.get(8)?,
                    },
                    score: 0.0,
                    uploaded_at: row.get(13)?,
                };
                Ok((hit, blob, scale as f32, offset as f32, dim as usize))
            })
            .map_err(db_err)?;

        let mut hits = Vec::new();
        for row in rows {
            let (mut hit, blob, scale, offset, dim) = row.map_err(db_err)?;
            if dim != q.len() || blob.len() != dim {
                warn!(
                    "Skipping chunk {}: dimension {} does not match query dimension {}",
                    hit.chunk_id,
                    dim,
                    q.len()
                );
                continue;
            }
            if !scope.admits(&hit.workspace_id, hit.is_global) {
                continue;
            }
            let v = dequantize_uint8(&blob, scale, offset);
            hit.score = normalized(v.view()).map_or(0.0, |v| v.dot(&q) as f64);
            hits.push(hit);
        }
        drop(stmt);
        drop(conn);

        hits.sort_by(rank_order);
        hits.truncate(top_k);
        Ok(hits)
    }

    fn remove(&self, document_id: i64) -> Result<usize> {
        self.write_tx(|tx| remove_chunks_tx(tx, document_id))
    }
}

/// Score descending, then newer document, then lower chunk id.
fn rank_order(a: &ChunkHit, b: &ChunkHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
