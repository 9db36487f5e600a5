//! `conversation` table access.
//!
//! Each pair of users has two rows, one per owner. The owner's row carries
//! their read pointer and whether they hid the conversation.
//!
//! The chat socket only writes here. [`ConversationRepo`] is the read side
//! for the conversation list and history endpoints that sit in front of the
//! store.

use haggle_core::{MessageId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages;
use crate::schema::LAST_MESSAGE_PREVIEW_CHARS;

/// One owner's view of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRow {
    /// User this row belongs to.
    pub owner: UserId,
    /// The other participant.
    pub peer: UserId,
    /// Preview of the newest message.
    pub last_message_content: String,
    /// RFC 3339 time of the newest message.
    pub last_message_time: Option<String>,
    /// Newest message the owner is known to have seen.
    pub last_read_message_id: Option<MessageId>,
    /// First message the owner missed while offline; `None` once caught up.
    pub first_unread_message_id: Option<MessageId>,
    /// Hidden by the owner until the next message arrives.
    pub mark_deleted: bool,
}

/// Access to conversation rows.
#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    /// Wrap a shared database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The owner's row for a conversation with `peer`.
    pub fn get(&self, owner: &UserId, peer: &UserId) -> Result<Option<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT from_user_id, to_user_id, last_message_content, last_message_time,
                            last_read_message_id, first_unread_message_id, mark_deleted
                     FROM conversation WHERE from_user_id = ?1 AND to_user_id = ?2",
                    params![owner.as_str(), peer.as_str()],
                    row_to_conversation,
                )
                .optional()?)
        })
    }

    /// Conversations visible to `owner`, newest activity first.
    pub fn list_visible(&self, owner: &UserId) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_user_id, to_user_id, last_message_content, last_message_time,
                        last_read_message_id, first_unread_message_id, mark_deleted
                 FROM conversation WHERE from_user_id = ?1 AND mark_deleted = 0
                 ORDER BY last_message_time DESC",
            )?;
            let rows = stmt.query_map([owner.as_str()], row_to_conversation)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Mark everything `owner` has in the conversation with `peer` as read.
    ///
    /// Moves the read pointer to the newest message and ends any offline
    /// period, so the next missed message starts a new one. Called when the
    /// owner fetches the conversation history. Returns the new pointer.
    pub fn mark_read(&self, owner: &UserId, peer: &UserId) -> Result<Option<MessageId>, StoreError> {
        let conversation_id = haggle_core::conversation_id(owner, peer);
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let newest = messages::newest_id(&tx, &conversation_id)?;
            let changed = tx.execute(
                "UPDATE conversation
                 SET last_read_message_id = ?3, first_unread_message_id = NULL, updated_at = ?4
                 WHERE from_user_id = ?1 AND to_user_id = ?2",
                params![
                    owner.as_str(),
                    peer.as_str(),
                    newest.as_ref().map(MessageId::as_str),
                    now()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {owner}:{peer}")));
            }
            tx.commit()?;
            Ok(newest)
        })
    }

    /// Hide the conversation from `owner` until the next message.
    pub fn mark_deleted(&self, owner: &UserId, peer: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversation SET mark_deleted = 1, updated_at = ?3
                 WHERE from_user_id = ?1 AND to_user_id = ?2",
                params![owner.as_str(), peer.as_str(), now()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {owner}:{peer}")));
            }
            Ok(())
        })
    }
}

/// Record a new message on `owner`'s row, creating it if needed and clearing
/// `mark_deleted`.
pub(crate) fn touch(
    conn: &Connection,
    owner: &UserId,
    peer: &UserId,
    content: &str,
    timestamp: &str,
) -> Result<(), StoreError> {
    let preview: String = content.chars().take(LAST_MESSAGE_PREVIEW_CHARS).collect();
    let _ = conn.execute(
        "INSERT INTO conversation
             (from_user_id, to_user_id, last_message_content, last_message_time,
              mark_deleted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?4, ?4)
         ON CONFLICT (from_user_id, to_user_id) DO UPDATE SET
             last_message_content = excluded.last_message_content,
             last_message_time = excluded.last_message_time,
             mark_deleted = 0,
             updated_at = excluded.updated_at",
        params![owner.as_str(), peer.as_str(), preview, timestamp],
    )?;
    Ok(())
}

/// Note that `owner` missed `missed` while offline.
///
/// The first miss of an offline period pins the read pointer to `last_read`,
/// the message before it. Later misses leave the row alone until
/// [`ConversationRepo::mark_read`] ends the period, so the pointer never
/// moves past a message the owner has not seen.
pub(crate) fn record_missed(
    conn: &Connection,
    owner: &UserId,
    peer: &UserId,
    last_read: Option<&MessageId>,
    missed: &MessageId,
) -> Result<bool, StoreError> {
    let ts = now();
    let changed = conn.execute(
        "INSERT INTO conversation
             (from_user_id, to_user_id, last_read_message_id, first_unread_message_id,
              created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT (from_user_id, to_user_id) DO UPDATE SET
             last_read_message_id = excluded.last_read_message_id,
             first_unread_message_id = excluded.first_unread_message_id,
             updated_at = excluded.updated_at
         WHERE conversation.first_unread_message_id IS NULL",
        params![
            owner.as_str(),
            peer.as_str(),
            last_read.map(MessageId::as_str),
            missed.as_str(),
            ts
        ],
    )?;
    Ok(changed > 0)
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        owner: UserId::new(row.get::<_, String>(0)?),
        peer: UserId::new(row.get::<_, String>(1)?),
        last_message_content: row.get(2)?,
        last_message_time: row.get(3)?,
        last_read_message_id: row.get::<_, Option<String>>(4)?.map(MessageId::from_raw),
        first_unread_message_id: row.get::<_, Option<String>>(5)?.map(MessageId::from_raw),
        mark_deleted: row.get(6)?,
    })
}
