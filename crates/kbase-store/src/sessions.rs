//! Session ledger: chat sessions and their strictly ordered messages.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::sqlite::{db_err, SqliteStore};
use crate::types::{ChatMessage, ChatSession, Citation, MessageRole};
use kbase_core::{authorize, now_millis, Action, Error, Principal, Resource, Result};

pub const DEFAULT_SESSION_TITLE: &str = "New chat";

const SESSION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, seq, role, content, sources_json, created_at";

impl SqliteStore {
    /// Open a session for an active user. A blank title becomes "New chat".
    pub fn create_session(&self, user_id: i64, title: Option<&str>) -> Result<ChatSession> {
        match self.get_user(user_id)? {
            Some(user) if user.active => {}
            _ => return Err(Error::not_found(format!("user {}", user_id))),
        }

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE);
        let now = now_millis();
        let session = ChatSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.conn()
            .execute(
                "INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session.id, user_id, session.title, now, now],
            )
            .map_err(db_err)?;
        debug!("Created session {} for user {}", session.id, user_id);
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        self.conn()
            .prepare_cached(&format!(
                "SELECT {} FROM chat_sessions WHERE id = ?1",
                SESSION_COLUMNS
            ))
            .map_err(db_err)?
            .query_row(params![session_id], row_to_session)
            .optional()
            .map_err(db_err)
    }

    /// Append a message with the next per-session ordinal and advance `updated_at`.
    ///
    /// `NotFound` if the session no longer exists.
    pub fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        sources: &[Citation],
    ) -> Result<ChatMessage> {
        let sources_json = serde_json::to_string(sources)?;

        self.write_tx(|tx| {
            let updated_at: Option<i64> = tx
                .query_row(
                    "SELECT updated_at FROM chat_sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(updated_at) = updated_at else {
                return Err(Error::not_found(format!("session {}", session_id)));
            };

            let seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_messages WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let now = now_millis();
            tx.execute(
                "INSERT INTO chat_messages (session_id, seq, role, content, sources_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![session_id, seq, role.as_str(), content, sources_json, now],
            )
            .map_err(db_err)?;
            let id = tx.last_insert_rowid();

            // Strictly advances even when two appends land in the same millisecond.
            tx.execute(
                "UPDATE chat_sessions SET updated_at = ?2 WHERE id = ?1",
                params![session_id, now.max(updated_at + 1)],
            )
            .map_err(db_err)?;

            Ok(ChatMessage {
                id,
                session_id: session_id.to_string(),
                seq,
                role,
                content: content.to_string(),
                sources: sources.to_vec(),
                created_at: now,
            })
        })
    }

    /// A user's sessions, most recently active first.
    pub fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {} FROM chat_sessions WHERE user_id = ?1 \
                 ORDER BY updated_at DESC, id ASC",
                SESSION_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id], row_to_session)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Every message of a session in creation order. `NotFound` if the session is gone.
    pub fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        if self.get_session(session_id)?.is_none() {
            return Err(Error::not_found(format!("session {}", session_id)));
        }
        self.query_messages(
            &format!(
                "SELECT {} FROM chat_messages WHERE session_id = ?1 ORDER BY seq ASC",
                MESSAGE_COLUMNS
            ),
            params![session_id],
        )
    }

    /// Messages of a session owned by `principal`. Foreign sessions read as absent.
    pub fn list_messages_for(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let session = self
            .get_session(session_id)?
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))?;
        authorize(principal, Action::ReadSession, Resource::owned_by(session.user_id))
            .map_err(|_| Error::not_found(format!("session {}", session_id)))?;
        let mut messages = self.list_messages(session_id)?;
        for message in &mut messages {
            collapse_citations(&mut message.sources);
        }
        Ok(messages)
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.query_messages(
            &format!(
                "SELECT {} FROM chat_messages WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2",
                MESSAGE_COLUMNS
            ),
            params![session_id, limit as i64],
        )?;
        messages.reverse();
        Ok(messages)
    }

    fn query_messages<P: rusqlite::Params>(&self, sql: &str, args: P) -> Result<Vec<ChatMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql).map_err(db_err)?;
        let rows = stmt.query_map(args, row_to_message).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Delete a session and, by cascade, its messages. Only the owner may.
    pub fn delete_session(&self, session_id: &str, requester: &Principal) -> Result<()> {
        let session = self
            .get_session(session_id)?
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))?;
        authorize(requester, Action::DeleteSession, Resource::owned_by(session.user_id))?;

        self.conn()
            .execute("DELETE FROM chat_sessions WHERE id = ?1", params![session_id])
            .map_err(db_err)?;
        info!("Deleted session {} of user {}", session_id, session.user_id);
        Ok(())
    }

    /// Creation times of sessions started at or after `since` (all users when `None`).
    pub fn session_starts_since(&self, user_id: Option<i64>, since: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT created_at FROM chat_sessions \
                 WHERE created_at >= ?1 AND (?2 IS NULL OR user_id = ?2) \
                 ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![since, user_id], |row| row.get(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(db_err)
    }

    pub fn count_sessions(&self, user_id: Option<i64>) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM chat_sessions WHERE ?1 IS NULL OR user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(db_err)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(3)?;
    let sources_json: String = row.get(5)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        seq: row.get(2)?,
        role: MessageRole::from_column(&role),
        content: row.get(4)?,
        sources: serde_json::from_str(&sources_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: row.get(6)?,
    })
}

/// One citation per source file, keeping the first (best scored) chunk.
fn collapse_citations(sources: &mut Vec<Citation>) {
    let mut seen = HashSet::new();
    sources.retain(|c| seen.insert((c.workspace_id.clone(), c.filename.clone())));
}
