//! Orchestrator: one question in, one cited answer out.
//!
//! The user turn is persisted before any external call, so a failed or
//! cancelled generation leaves a valid session holding the question.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{Answer, RuntimeLimits, StreamedAnswer};
use kbase_chat::{
    build_messages, select_sources, GenerationRequest, Generator, PromptMessage, HISTORY_TURNS,
};
use kbase_core::{Error, Principal, Result};
use kbase_resolve::Resolver;
use kbase_store::{ChatMessage, ChatSession, Citation, MessageRole, SqliteStore};

/// Titles derived from the first question keep this many chars.
const TITLE_CHARS: usize = 20;

struct PreparedTurn {
    session_id: String,
    user_message_id: i64,
    created_session: bool,
    citations: Vec<Citation>,
    request: GenerationRequest,
}

pub struct Orchestrator {
    store: Arc<SqliteStore>,
    resolver: Arc<Resolver>,
    generator: Arc<dyn Generator>,
    limits: RuntimeLimits,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SqliteStore>,
        resolver: Arc<Resolver>,
        generator: Arc<dyn Generator>,
        limits: RuntimeLimits,
    ) -> Self {
        info!(
            "Orchestrator initialized: model={}, top_k={}, embed_timeout={:?}, generate_timeout={:?}",
            generator.model_name(),
            limits.top_k,
            limits.embed_timeout,
            limits.generate_timeout
        );
        Self {
            store,
            resolver,
            generator,
            limits,
        }
    }

    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    /// Answer `user_text` in `session_id`, or in a new session when none is given.
    ///
    /// Errors: `InvalidInput` for blank text, `NotFound` for a foreign or
    /// missing session, `UpstreamUnavailable` when retrieval or generation
    /// fails (the user turn stays), `Conflict` when the session is deleted
    /// while the answer is produced.
    pub async fn answer(
        &self,
        principal: &Principal,
        session_id: Option<&str>,
        user_text: &str,
    ) -> Result<Answer> {
        let turn = self.prepare(principal, session_id, user_text).await?;

        let reply = bounded(
            self.limits.generate_timeout,
            "generation",
            self.generator.generate(&turn.request),
        )
        .await
        .map_err(|e| {
            warn!("Session {}: generation failed: {}", turn.session_id, e);
            e
        })?;

        let assistant = self.append(&turn.session_id, MessageRole::Assistant, &reply, &turn.citations)?;

        Ok(Answer {
            session_id: turn.session_id,
            user_message_id: turn.user_message_id,
            assistant,
            created_session: turn.created_session,
        })
    }

    /// Like `answer`, but hands back the generation as a stream. The user
    /// turn and the citations are settled before the first token; the
    /// assistant turn is written by `finish_stream` once the stream ends.
    pub async fn answer_stream(
        &self,
        principal: &Principal,
        session_id: Option<&str>,
        user_text: &str,
    ) -> Result<StreamedAnswer> {
        let turn = self.prepare(principal, session_id, user_text).await?;
        let deadline = Instant::now() + self.limits.generate_timeout;

        let tokens = bounded(
            self.limits.generate_timeout,
            "generation",
            self.generator.generate_stream(&turn.request),
        )
        .await
        .map_err(|e| {
            warn!("Session {}: generation failed: {}", turn.session_id, e);
            e
        })?;

        Ok(StreamedAnswer {
            session_id: turn.session_id,
            user_message_id: turn.user_message_id,
            created_session: turn.created_session,
            citations: turn.citations,
            tokens,
            deadline,
        })
    }

    /// Persist the assistant turn of a stream that ran to completion.
    pub fn finish_stream(&self, answer: &StreamedAnswer, reply: &str) -> Result<ChatMessage> {
        if reply.trim().is_empty() {
            return Err(Error::upstream(format!(
                "{} returned an empty answer",
                self.generator.model_name()
            )));
        }
        self.append(&answer.session_id, MessageRole::Assistant, reply, &answer.citations)
    }

    /// Everything before generation: session, user turn, history, retrieval
    /// and source selection.
    async fn prepare(
        &self,
        principal: &Principal,
        session_id: Option<&str>,
        user_text: &str,
    ) -> Result<PreparedTurn> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(Error::invalid("message must not be empty"));
        }

        let (session, created_session) = match session_id {
            Some(id) => (self.owned_session(principal, id)?, false),
            None => {
                let session = self
                    .store
                    .create_session(principal.user_id, Some(&derive_title(text)))?;
                (session, true)
            }
        };

        let user_msg = self.append(&session.id, MessageRole::User, text, &[])?;
        let history = self.history(&session.id, user_msg.id)?;

        let passages = bounded(
            self.limits.embed_timeout,
            "retrieval",
            self.resolver.retrieve(text, principal, self.limits.top_k),
        )
        .await
        .map_err(|e| {
            warn!("Session {}: retrieval failed: {}", session.id, e);
            e
        })?;

        let sources = select_sources(&passages);
        debug!(
            "Session {}: {} passages retrieved, {} cited",
            session.id,
            passages.len(),
            sources.len()
        );

        Ok(PreparedTurn {
            request: GenerationRequest {
                messages: build_messages(history, &sources, text),
                temperature: self.limits.temperature,
                max_tokens: self.limits.max_tokens,
            },
            citations: sources.iter().map(|p| p.to_citation()).collect(),
            session_id: session.id,
            user_message_id: user_msg.id,
            created_session,
        })
    }

    fn owned_session(&self, principal: &Principal, session_id: &str) -> Result<ChatSession> {
        match self.store.get_session(session_id)? {
            Some(s) if s.user_id == principal.user_id => Ok(s),
            _ => Err(Error::not_found(format!("session {}", session_id))),
        }
    }

    /// Appending to a session that vanished after the ownership check is a conflict.
    fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        sources: &[Citation],
    ) -> Result<ChatMessage> {
        self.store
            .append_message(session_id, role, content, sources)
            .map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::Conflict(format!("session {} was deleted during the request", session_id))
                }
                other => other,
            })
    }

    /// Up to `HISTORY_TURNS` turns preceding `current_id`, oldest first.
    fn history(&self, session_id: &str, current_id: i64) -> Result<Vec<PromptMessage>> {
        let mut recent = self.store.recent_messages(session_id, HISTORY_TURNS + 1)?;
        recent.retain(|m| m.id != current_id);
        let skip = recent.len().saturating_sub(HISTORY_TURNS);
        Ok(recent
            .into_iter()
            .skip(skip)
            .map(|m| match m.role {
                MessageRole::User => PromptMessage::user(m.content),
                MessageRole::Assistant => PromptMessage::assistant(m.content),
            })
            .collect())
    }
}

/// First `TITLE_CHARS` chars of the question.
fn derive_title(text: &str) -> String {
    text.chars().take(TITLE_CHARS).collect::<String>().trim().to_string()
}

/// Run an external call under a deadline; timeouts surface as `UpstreamUnavailable`.
async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::upstream(format!("{} timed out after {:?}", what, limit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("How many days of annual leave do I get?"), "How many days of ann");
        assert_eq!(derive_title("年假有几天？"), "年假有几天？");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(1)
        };
        let err = bounded(Duration::from_millis(10), "generation", slow).await.unwrap_err();
        assert!(err.is_upstream());
        assert_eq!(bounded(Duration::from_secs(1), "x", async { Ok(2) }).await.unwrap(), 2);
    }
}
