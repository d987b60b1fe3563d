use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use kana_core::entries::ChatEntry;
use kana_core::ids::{ConversationId, ToolCallId};
use kana_core::messages::{Message, Role, ToolCall};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Start a new conversation now.
    pub fn create(&self) -> Result<ConversationRow, StoreError> {
        self.create_at(Utc::now())
    }

    /// Start a new conversation. Any conversation still open is closed first,
    /// so at most one is ever open.
    #[instrument(skip(self))]
    pub fn create_at(&self, started_at: DateTime<Utc>) -> Result<ConversationRow, StoreError> {
        let id = ConversationId::new();
        let started = row_helpers::timestamp(started_at);

        self.db.with_conn(|conn| {
            let closed = conn.execute(
                "UPDATE conversations SET ended_at = ?1 WHERE ended_at IS NULL",
                [&started],
            )?;
            if closed > 0 {
                warn!(closed, "closed dangling open conversations");
            }
            conn.execute(
                "INSERT INTO conversations (id, started_at) VALUES (?1, ?2)",
                rusqlite::params![id.as_str(), started],
            )?;
            Ok(ConversationRow {
                id,
                started_at,
                ended_at: None,
                summary: None,
            })
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, ended_at, summary FROM conversations WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// The open conversation, if any.
    pub fn active(&self) -> Result<Option<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, ended_at, summary FROM conversations
                 WHERE ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_conversation(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Stamp `ended_at` and attach the summary, if one was produced.
    #[instrument(skip(self, summary), fields(conversation_id = %id))]
    pub fn end(&self, id: &ConversationId, summary: Option<&str>) -> Result<(), StoreError> {
        let now = row_helpers::timestamp(Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET ended_at = ?1, summary = ?2 WHERE id = ?3",
                rusqlite::params![now, summary, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    /// Append one chat entry as a message row. Returns the row id.
    pub fn append_message(
        &self,
        conversation_id: &ConversationId,
        entry: &ChatEntry,
    ) -> Result<i64, StoreError> {
        let tool_calls = entry
            .message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (conversation_id, role, content, emotion, label, tool_calls, tool_call_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    conversation_id.as_str(),
                    entry.message.role.as_str(),
                    entry.message.content,
                    entry.emotion,
                    entry.label,
                    tool_calls,
                    entry.message.tool_call_id.as_ref().map(|id| id.as_str()),
                    row_helpers::timestamp(entry.timestamp),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All stored rows of a conversation, oldest first.
    pub fn messages(&self, conversation_id: &ConversationId) -> Result<Vec<ChatEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, emotion, label, tool_calls, tool_call_id, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([conversation_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
    }

    /// Delete the newest `n` rows of a conversation. Returns how many were removed.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn delete_last(&self, conversation_id: &ConversationId, n: usize) -> Result<usize, StoreError> {
        if n == 0 {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages WHERE id IN (
                    SELECT id FROM messages WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2
                 )",
                rusqlite::params![conversation_id.as_str(), n as i64],
            )?;
            Ok(removed)
        })
    }

    pub fn message_count(&self, conversation_id: &ConversationId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Summaries of conversations started in `[from, until)`, oldest first.
    pub fn summaries_between(&self, from: NaiveDate, until: NaiveDate) -> Result<Vec<String>, StoreError> {
        let from = from.format("%Y-%m-%d").to_string();
        let until = until.format("%Y-%m-%d").to_string();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT summary FROM conversations
                 WHERE summary IS NOT NULL AND started_at >= ?1 AND started_at < ?2
                 ORDER BY started_at ASC",
            )?;
            let rows = stmt.query_map([from, until], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let id: String = row_helpers::get(row, 0, "conversations", "id")?;
    let started: String = row_helpers::get(row, 1, "conversations", "started_at")?;
    let ended: Option<String> = row_helpers::get_opt(row, 2, "conversations", "ended_at")?;
    Ok(ConversationRow {
        id: ConversationId::from_raw(id),
        started_at: row_helpers::parse_timestamp(&started, "conversations", "started_at")?,
        ended_at: ended
            .map(|raw| row_helpers::parse_timestamp(&raw, "conversations", "ended_at"))
            .transpose()?,
        summary: row_helpers::get_opt(row, 3, "conversations", "summary")?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<ChatEntry, StoreError> {
    let role: String = row_helpers::get(row, 0, "messages", "role")?;
    let tool_calls: Option<String> = row_helpers::get_opt(row, 4, "messages", "tool_calls")?;
    let tool_call_id: Option<String> = row_helpers::get_opt(row, 5, "messages", "tool_call_id")?;
    let created: String = row_helpers::get(row, 6, "messages", "created_at")?;

    Ok(ChatEntry {
        message: Message {
            role: row_helpers::parse_enum::<Role>(&role, "messages", "role")?,
            content: row_helpers::get_opt(row, 1, "messages", "content")?,
            tool_calls: tool_calls
                .map(|raw| row_helpers::parse_json::<Vec<ToolCall>>(&raw, "messages", "tool_calls"))
                .transpose()?,
            tool_call_id: tool_call_id.map(ToolCallId::from_raw),
        },
        emotion: row_helpers::get_opt(row, 2, "messages", "emotion")?,
        label: row_helpers::get_opt(row, 3, "messages", "label")?,
        timestamp: row_helpers::parse_timestamp(&created, "messages", "created_at")?,
    })
}
