//! Durable message persistence behind the `MessageStore` seam.
//!
//! The hub only ever talks to `dyn MessageStore`. Two backends exist:
//! SQLite (the default, in `data_dir`) and an in-memory vector for
//! `--ephemeral` runs and tests.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use std::sync::Mutex;

use crate::chat::model::{Message, MessageKind, UserId};
use crate::db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Persistence collaborator consulted by the hub.
///
/// A conversation is every message where the user is sender or recipient.
/// All reads return messages oldest first.
pub trait MessageStore: Send + Sync {
    /// Persist `message`, assigning its `id` and `created_at`.
    fn save(&self, message: &mut Message) -> Result<(), StoreError>;

    /// The newest `limit` messages of the user's conversation.
    fn last_messages(&self, user_id: UserId, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Up to `limit` messages of the conversation with an id below `before_id`.
    fn messages_before(
        &self,
        user_id: UserId,
        before_id: u64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}

/// SQLite ids are signed; anything past i64::MAX means "no upper bound".
fn sql_id(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

const SELECT_COLUMNS: &str = "SELECT id, from_id, to_id, content, kind, file_name, created_at FROM messages";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_at: String = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let kind: String = row.get(4)?;

    Ok(Message {
        id: row.get::<_, i64>(0)? as u64,
        from_id: row.get::<_, i64>(1)? as u64,
        to_id: row.get::<_, i64>(2)? as u64,
        content: row.get(3)?,
        kind: MessageKind::from_db(&kind),
        file_name: row.get(5)?,
        created_at,
    })
}

/// `MessageStore` backed by the shared SQLite connection.
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn query_desc(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(sql)?;
        let mut messages = stmt
            .query_map(params, row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        // Queried newest first so LIMIT keeps the newest rows
        messages.reverse();
        Ok(messages)
    }
}

impl MessageStore for SqliteMessageStore {
    fn save(&self, message: &mut Message) -> Result<(), StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO messages (from_id, to_id, content, kind, file_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                sql_id(message.from_id),
                sql_id(message.to_id),
                message.content,
                message.kind.as_str(),
                message.file_name,
                created_at.to_rfc3339(),
            ],
        )?;

        message.id = conn.last_insert_rowid() as u64;
        message.created_at = created_at;
        Ok(())
    }

    fn last_messages(&self, user_id: UserId, limit: usize) -> Result<Vec<Message>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{SELECT_COLUMNS} WHERE from_id = ?1 OR to_id = ?1 ORDER BY id DESC LIMIT ?2"
        );
        self.query_desc(&sql, rusqlite::params![sql_id(user_id), sql_limit(limit)])
    }

    fn messages_before(
        &self,
        user_id: UserId,
        before_id: u64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{SELECT_COLUMNS} WHERE (from_id = ?1 OR to_id = ?1) AND id < ?2 ORDER BY id DESC LIMIT ?3"
        );
        self.query_desc(
            &sql,
            rusqlite::params![sql_id(user_id), sql_id(before_id), sql_limit(limit)],
        )
    }
}

/// Process-lifetime store. History is lost on restart.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message, oldest first.
    pub fn all(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    fn newest_matching(
        &self,
        limit: usize,
        filter: impl Fn(&Message) -> bool,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        let mut found: Vec<Message> = messages
            .iter()
            .rev()
            .filter(|m| filter(m))
            .take(limit)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }
}

impl MessageStore for MemoryMessageStore {
    fn save(&self, message: &mut Message) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        message.id = messages.len() as u64 + 1;
        message.created_at = Utc::now();
        messages.push(message.clone());
        Ok(())
    }

    fn last_messages(&self, user_id: UserId, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.newest_matching(limit, |m| m.involves(user_id))
    }

    fn messages_before(
        &self,
        user_id: UserId,
        before_id: u64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.newest_matching(limit, |m| m.involves(user_id) && m.id < before_id)
    }
}
