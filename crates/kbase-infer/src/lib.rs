//! kbase infer: embedding backends.
//!
//! `HttpEmbedder` talks to an Ollama server. `HashingEmbedder` needs no
//! network and is selected with `EMBED_BACKEND=hashing`.

pub mod embedder;
pub mod hashing;
pub mod http;

pub use embedder::Embedder;
pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

use std::sync::Arc;
use std::time::Duration;

use kbase_core::{Error, KbaseConfig, Result};

/// Which embedding backend to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedBackend {
    Ollama,
    Hashing,
}

#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    pub backend: EmbedBackend,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl EmbedderSettings {
    /// `EMBED_BACKEND`, `OLLAMA_BASE_URL` and `EMBED_MODEL_NAME`, over the kbase config.
    pub fn from_env(config: &KbaseConfig) -> Result<Self> {
        let backend = match std::env::var("EMBED_BACKEND").as_deref() {
            Ok("hashing") => EmbedBackend::Hashing,
            Ok("ollama") | Err(_) => EmbedBackend::Ollama,
            Ok(other) => {
                return Err(Error::Config(format!("unknown EMBED_BACKEND '{}'", other)));
            }
        };
        Ok(Self {
            backend,
            base_url: std::env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("EMBED_MODEL_NAME").unwrap_or_else(|_| "bge-m3".to_string()),
            dimension: config.embedding_dim,
            timeout: config.embed_timeout(),
        })
    }
}

/// Build the configured embedder.
pub fn create_embedder(settings: &EmbedderSettings) -> Result<Arc<dyn Embedder>> {
    match settings.backend {
        EmbedBackend::Ollama => {
            tracing::info!(
                "Using Ollama embedder {} at {} (dim={})",
                settings.model,
                settings.base_url,
                settings.dimension
            );
            Ok(Arc::new(HttpEmbedder::new(
                &settings.base_url,
                &settings.model,
                settings.dimension,
                settings.timeout,
            )?))
        }
        EmbedBackend::Hashing => {
            tracing::info!("Using offline hashing embedder (dim={})", settings.dimension);
            Ok(Arc::new(HashingEmbedder::new(settings.dimension)))
        }
    }
}
