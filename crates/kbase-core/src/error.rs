//! Error types for kbase.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Referenced entity is absent or already deleted.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Role or ownership check failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A concurrent mutation invalidated an assumption (e.g. session deleted mid-append).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Embedding, generation or storage dependency failed or timed out.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A principal references a workspace id absent from the registry.
    #[error("Unknown workspace: {0}")]
    UnknownWorkspace(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn forbidden(why: impl std::fmt::Display) -> Self {
        Self::Forbidden(why.to_string())
    }

    pub fn upstream(what: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(what.to_string())
    }

    pub fn invalid(what: impl std::fmt::Display) -> Self {
        Self::InvalidInput(what.to_string())
    }

    /// Whether the failure came from an external collaborator rather than the core.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = Error::not_found("session abc");
        assert_eq!(err.to_string(), "Not found: session abc");
        assert!(!err.is_upstream());
        assert!(Error::upstream("embedder timed out").is_upstream());
    }
}
