//! Runtime types.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use kbase_chat::TokenStream;
use kbase_core::{Error, KbaseConfig, Result};
use kbase_store::{ChatMessage, Citation};

/// Result of one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub session_id: String,
    pub user_message_id: i64,
    pub assistant: ChatMessage,
    /// Whether this call opened the session.
    pub created_session: bool,
}

/// An answer whose text is still arriving.
pub struct StreamedAnswer {
    pub session_id: String,
    pub user_message_id: i64,
    pub created_session: bool,
    /// Fixed before the first token.
    pub citations: Vec<Citation>,
    pub(crate) tokens: TokenStream,
    pub(crate) deadline: Instant,
}

impl StreamedAnswer {
    /// The next fragment. Past the generation deadline this yields an
    /// `UpstreamUnavailable` error, after which the caller should stop.
    pub async fn next_token(&mut self) -> Option<Result<String>> {
        match tokio::time::timeout_at(self.deadline, self.tokens.next()).await {
            Ok(item) => item,
            Err(_) => Some(Err(Error::upstream("generation timed out"))),
        }
    }
}

/// Bounds on external calls made while answering.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    pub top_k: usize,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    pub temperature: f64,
    pub max_tokens: usize,
}

impl RuntimeLimits {
    pub fn from_config(config: &KbaseConfig, temperature: f64, max_tokens: usize) -> Self {
        Self {
            top_k: config.retrieval_top_k,
            embed_timeout: config.embed_timeout(),
            generate_timeout: config.generate_timeout(),
            temperature,
            max_tokens,
        }
    }
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            top_k: 5,
            embed_timeout: Duration::from_secs(60),
            generate_timeout: Duration::from_secs(300),
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}
