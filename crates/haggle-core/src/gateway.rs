//! Collaborator traits consumed by the message router.
//!
//! Storage and media hosting live outside the messaging core. The router
//! talks to them only through these traits so tests can substitute fakes.

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::ids::{MessageId, UserId};
use crate::message::ChatMessage;

/// Durable message storage and read-pointer bookkeeping.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a `send` message and return the durable id assigned to it.
    async fn save_message(&self, message: &ChatMessage) -> Result<MessageId, GatewayError>;

    /// Remember the last message `to` had not yet seen from `from`, so an
    /// offline recipient can catch up on reconnect.
    async fn record_last_read_message(
        &self,
        from: &UserId,
        to: &UserId,
        last_message_id: &MessageId,
    ) -> Result<(), GatewayError>;
}

/// Resolves uploaded media object keys to public URLs.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// URL for `key` inside the media bucket of `conversation_id`.
    async fn resolve_media_url(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<String, GatewayError>;
}
