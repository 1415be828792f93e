//! Object storage for uploaded bytes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use kbase_core::{Error, Result};

/// Where raw upload bytes live. Locators are opaque to callers.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Store `bytes` under a scope partition and return the locator. Every
    /// call yields a fresh locator, even for identical content, so deleting
    /// one never touches bytes another upload still references.
    async fn store(&self, scope: &str, content_hash: &str, bytes: &[u8]) -> Result<String>;

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, locator: &str) -> Result<()>;
}

/// Filesystem storage: `<root>/<scope>/<content_hash>-<nonce>`.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, locator: &str) -> Result<PathBuf> {
        let mut parts = locator.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scope), Some(name), None) if is_segment(scope) && is_segment(name) => {
                Ok(self.root.join(scope).join(name))
            }
            _ => Err(Error::invalid(format!("bad object locator '{}'", locator))),
        }
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn store(&self, scope: &str, content_hash: &str, bytes: &[u8]) -> Result<String> {
        let locator = format!("{}/{}-{}", scope, content_hash, Uuid::new_v4().simple());
        let path = self.path_for(&locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::upstream(format!("object storage: {}", e)))?;
        }
        // Write to a temp name first so a crash never leaves a torn object.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::upstream(format!("object storage: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::upstream(format!("object storage: {}", e)))?;
        debug!("Stored {} bytes at {}", bytes.len(), locator);
        Ok(locator)
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("object {}", locator)))
            }
            Err(e) => Err(Error::upstream(format!("object storage: {}", e))),
        }
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        let path = self.path_for(locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::upstream(format!("object storage: {}", e))),
        }
    }
}
