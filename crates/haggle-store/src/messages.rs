//! `message` table access.
//!
//! Writes happen inside the gateway's transactions. [`MessageRepo`] serves
//! history and unread counts to the HTTP layer in front of the store.

use haggle_core::{ChatMessage, MessageId, UserId};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// A persisted chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    /// Durable id.
    pub id: MessageId,
    /// `"{lower}:{higher}"` pair key.
    pub conversation_id: String,
    /// Sender.
    pub from: UserId,
    /// Recipient.
    pub to: UserId,
    /// Body (text, media URL or link).
    pub content: String,
    /// Wire name of the media type.
    pub media_type: String,
    /// RFC 3339 insertion time.
    pub timestamp: String,
}

/// Read access to stored messages.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    /// Wrap a shared database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch one message by id.
    pub fn get(&self, id: &MessageId) -> Result<Option<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, conversation_id, from_user_id, to_user_id, content, media_type, timestamp
                     FROM message WHERE id = ?1",
                    [id.as_str()],
                    row_to_message,
                )
                .optional()?)
        })
    }

    /// Newest `limit` messages of a conversation, oldest first.
    #[instrument(skip(self))]
    pub fn recent(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, from_user_id, to_user_id, content, media_type, timestamp
                 FROM message WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![conversation_id, limit], row_to_message)?;
            let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
    }

    /// Messages in a conversation with an id after `after` (all when `None`).
    pub fn count_after(
        &self,
        conversation_id: &str,
        after: Option<&MessageId>,
    ) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let after = after.map_or("", MessageId::as_str);
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM message WHERE conversation_id = ?1 AND id > ?2",
                params![conversation_id, after],
                |row| row.get(0),
            )?)
        })
    }
}

/// Insert a message under `id`. Runs inside the caller's transaction.
pub(crate) fn insert(
    conn: &Connection,
    id: &MessageId,
    message: &ChatMessage,
    timestamp: &str,
) -> Result<(), StoreError> {
    let _ = conn.execute(
        "INSERT INTO message (id, conversation_id, from_user_id, to_user_id, content, media_type, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.as_str(),
            message.conversation_id(),
            message.from.as_str(),
            message.to.as_str(),
            message.content,
            message.media_type.as_str(),
            timestamp,
        ],
    )?;
    Ok(())
}

/// Id of the newest message in `conversation_id` older than `before`.
pub(crate) fn previous_id(
    conn: &Connection,
    conversation_id: &str,
    before: &MessageId,
) -> Result<Option<MessageId>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM message WHERE conversation_id = ?1 AND id < ?2
             ORDER BY id DESC LIMIT 1",
            params![conversation_id, before.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(MessageId::from_raw))
}

/// Id of the newest message in `conversation_id`.
pub(crate) fn newest_id(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<MessageId>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM message WHERE conversation_id = ?1 ORDER BY id DESC LIMIT 1",
            [conversation_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(MessageId::from_raw))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: MessageId::from_raw(row.get::<_, String>(0)?),
        conversation_id: row.get(1)?,
        from: UserId::new(row.get::<_, String>(2)?),
        to: UserId::new(row.get::<_, String>(3)?),
        content: row.get(4)?,
        media_type: row.get(5)?,
        timestamp: row.get(6)?,
    })
}
