//! Ollama embedding client.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::embedder::Embedder;
use kbase_core::{Error, Result};

/// Requests in flight per `embed_batch` wave.
const BATCH_SIZE: usize = 10;

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Calls `POST {base_url}/api/embeddings` with `{model, prompt}`.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, dim: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(|e| Error::upstream(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(format!("embedding API error {}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("invalid embedding response: {}", e)))?;

        if parsed.embedding.len() != self.dim {
            return Err(Error::upstream(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                parsed.embedding.len(),
                self.dim
            )));
        }
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for wave in texts.chunks(BATCH_SIZE) {
            let vectors = try_join_all(wave.iter().map(|t| self.embed(t))).await?;
            out.extend(vectors);
        }
        debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let e = HttpEmbedder::new("http://localhost:11434/", "bge-m3", 1024, Duration::from_secs(5))
            .unwrap();
        assert_eq!(e.endpoint(), "http://localhost:11434/api/embeddings");
        assert_eq!(e.dimension(), 1024);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_upstream_error() {
        // Port 9 (discard) is closed on test machines.
        let e = HttpEmbedder::new("http://127.0.0.1:9", "bge-m3", 4, Duration::from_secs(2)).unwrap();
        let err = e.embed("hello").await.unwrap_err();
        assert!(err.is_upstream());
    }
}
