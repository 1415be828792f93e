//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths to all kbase data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Database directory (`data/db/`).
    pub db: PathBuf,
    /// Uploaded file bytes, partitioned by scope (`data/files/`).
    pub files: PathBuf,
    /// Model backend configuration (`data/llm-config.json`).
    pub llm_config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            db: root.join("db"),
            files: root.join("files"),
            llm_config_file: root.join("llm-config.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.db)?;
        std::fs::create_dir_all(&self.files)?;
        Ok(())
    }
}

/// Top-level kbase configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbaseConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Embedding dimension of the deployed model (1024 for BGE-M3).
    pub embedding_dim: usize,
    /// Passages requested from the resolver per question.
    pub retrieval_top_k: usize,
    /// Upper bound on one embedding call.
    pub embed_timeout_secs: u64,
    /// Upper bound on one generation call.
    pub generate_timeout_secs: u64,
    /// HMAC secret for bearer tokens.
    pub jwt_secret: String,
    /// Bearer token lifetime.
    pub token_ttl_minutes: i64,
}

impl KbaseConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let data_paths = DataPaths::new(data_dir)?;

        let jwt_secret = std::env::var("JWT_SECRET_KEY").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET_KEY not set, using an insecure development secret");
            "kbase-dev-secret".to_string()
        });

        Ok(Self {
            port: env_parse("PORT", 8000),
            data_paths,
            embedding_dim: env_parse("EMBEDDING_DIM", 1024),
            retrieval_top_k: env_parse("RETRIEVAL_TOP_K", 5),
            embed_timeout_secs: env_parse("EMBED_TIMEOUT_SECS", 60),
            generate_timeout_secs: env_parse("GENERATE_TIMEOUT_SECS", 300),
            jwt_secret,
            token_ttl_minutes: env_parse("TOKEN_TTL_MINUTES", 1440),
        })
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_paths_created() {
        let dir = std::env::temp_dir().join(format!("kbase-paths-{}", std::process::id()));
        let paths = DataPaths::new(&dir).unwrap();
        assert!(paths.db.is_dir());
        assert!(paths.files.is_dir());
        assert_eq!(paths.llm_config_file, dir.join("llm-config.json"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
