//! Gateway implementations backed by the local database.

use std::path::Path;

use async_trait::async_trait;
use haggle_core::{ChatMessage, GatewayError, MessageId, PersistenceGateway, ResourceGateway, UserId};
use tracing::{debug, instrument};

use crate::conversations::{self, ConversationRepo};
use crate::database::Database;
use crate::error::StoreError;
use crate::messages::{self, MessageRepo};

/// [`PersistenceGateway`] over `SQLite`.
///
/// Queries run on the blocking pool so a slow disk never stalls a read pump.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// Store backed by an in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory()?,
        })
    }

    /// Message queries sharing this store's connection.
    pub fn messages(&self) -> MessageRepo {
        MessageRepo::new(self.db.clone())
    }

    /// Conversation queries sharing this store's connection.
    pub fn conversations(&self) -> ConversationRepo {
        ConversationRepo::new(self.db.clone())
    }

    /// Insert the message and refresh both participants' conversation rows
    /// in one transaction.
    pub fn save_blocking(&self, message: &ChatMessage) -> Result<MessageId, StoreError> {
        let id = MessageId::generate();
        let timestamp = conversations::now();
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            messages::insert(&tx, &id, message, &timestamp)?;
            conversations::touch(&tx, &message.from, &message.to, &message.content, &timestamp)?;
            conversations::touch(&tx, &message.to, &message.from, &message.content, &timestamp)?;
            tx.commit()?;
            Ok(())
        })?;
        debug!(message_id = %id, conversation_id = %message.conversation_id(), "message saved");
        Ok(id)
    }

    /// Note that `to` missed `last_message_id` while offline.
    ///
    /// The first miss since `to` last read the conversation points their
    /// read marker at the message before it. Further misses keep the marker
    /// where it is, so everything from the first miss on counts as unread.
    pub fn record_last_read_blocking(
        &self,
        from: &UserId,
        to: &UserId,
        last_message_id: &MessageId,
    ) -> Result<(), StoreError> {
        let conversation_id = haggle_core::conversation_id(from, to);
        let moved = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let previous = messages::previous_id(&tx, &conversation_id, last_message_id)?;
            let moved =
                conversations::record_missed(&tx, to, from, previous.as_ref(), last_message_id)?;
            tx.commit()?;
            Ok(moved)
        })?;
        debug!(user_id = %to, message_id = %last_message_id, moved, "offline message recorded");
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    #[instrument(skip_all, fields(from = %message.from, to = %message.to))]
    async fn save_message(&self, message: &ChatMessage) -> Result<MessageId, GatewayError> {
        let store = self.clone();
        let message = message.clone();
        let id = tokio::task::spawn_blocking(move || store.save_blocking(&message))
            .await
            .map_err(StoreError::from)??;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn record_last_read_message(
        &self,
        from: &UserId,
        to: &UserId,
        last_message_id: &MessageId,
    ) -> Result<(), GatewayError> {
        let store = self.clone();
        let (from, to, id) = (from.clone(), to.clone(), last_message_id.clone());
        tokio::task::spawn_blocking(move || store.record_last_read_blocking(&from, &to, &id))
            .await
            .map_err(StoreError::from)??;
        Ok(())
    }
}

/// [`ResourceGateway`] that maps object keys onto a fixed public prefix:
/// `{base_url}/conversations/{conversation_id}/{key}`.
#[derive(Clone, Debug)]
pub struct StaticResourceGateway {
    base_url: String,
}

impl StaticResourceGateway {
    /// Gateway rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    /// Synchronous form of [`ResourceGateway::resolve_media_url`].
    pub fn resolve(&self, conversation_id: &str, key: &str) -> Result<String, GatewayError> {
        let key = key.trim().trim_start_matches('/');
        if key.is_empty() {
            return Err(GatewayError::Media("empty object key".into()));
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(GatewayError::Media(format!("invalid object key: {key}")));
        }
        if conversation_id.is_empty() {
            return Err(GatewayError::Media("empty conversation id".into()));
        }
        Ok(format!(
            "{}/conversations/{conversation_id}/{key}",
            self.base_url
        ))
    }
}

#[async_trait]
impl ResourceGateway for StaticResourceGateway {
    async fn resolve_media_url(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<String, GatewayError> {
        self.resolve(conversation_id, key)
    }
}
