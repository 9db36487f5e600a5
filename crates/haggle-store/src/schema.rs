//! SQL DDL for the chat database.
//! WAL mode enabled at connection time.

/// Current schema version, stored in `schema_version`.
pub const SCHEMA_VERSION: u32 = 1;

/// Tables and indexes, idempotent.
///
/// `conversation` holds one row per (owner, peer) direction: the owner's view
/// of their chat with the peer. `first_unread_message_id` is set while the
/// owner has missed messages they have not fetched yet.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS message (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    from_user_id TEXT NOT NULL,
    to_user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    media_type TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation (
    from_user_id TEXT NOT NULL,
    to_user_id TEXT NOT NULL,
    last_message_content TEXT NOT NULL DEFAULT '',
    last_message_time TEXT,
    last_read_message_id TEXT,
    first_unread_message_id TEXT,
    mark_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (from_user_id, to_user_id)
);

CREATE INDEX IF NOT EXISTS idx_message_conversation ON message(conversation_id, id);
CREATE INDEX IF NOT EXISTS idx_message_timestamp ON message(timestamp);
CREATE INDEX IF NOT EXISTS idx_conversation_last_time ON conversation(last_message_time);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

/// Per-connection pragmas.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

/// Longest preview kept in `conversation.last_message_content`, in chars.
pub const LAST_MESSAGE_PREVIEW_CHARS: usize = 200;
