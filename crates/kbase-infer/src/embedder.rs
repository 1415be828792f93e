//! Embedding backend trait.
//!
//! Implementations:
//! - `HttpEmbedder`: Ollama `/api/embeddings` (BGE-M3 by default, 1024-dim)
//! - `HashingEmbedder`: deterministic feature hashing, no network

use async_trait::async_trait;

use kbase_core::Result;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. Backend failures are `UpstreamUnavailable`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}
