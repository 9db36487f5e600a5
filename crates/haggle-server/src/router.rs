//! Inbound message dispatch: persist, route, acknowledge.

use std::sync::Arc;

use haggle_core::{ChatMessage, GatewayError, MessageType, PersistenceGateway, ResourceGateway};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::connection::{Connection, EnqueueError};
use crate::metrics::{
    CHAT_ACKS_TOTAL, CHAT_MESSAGES_DELIVERED_TOTAL, CHAT_MESSAGES_FAILED_TOTAL,
    CHAT_MESSAGES_OFFLINE_TOTAL, CHAT_MESSAGES_RECEIVED_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// Routes decoded frames from a connection's read pump.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    persistence: Arc<dyn PersistenceGateway>,
    resources: Arc<dyn ResourceGateway>,
    sender_receipts: bool,
}

impl MessageRouter {
    /// Router over the given registry and collaborators.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        persistence: Arc<dyn PersistenceGateway>,
        resources: Arc<dyn ResourceGateway>,
    ) -> Self {
        Self {
            registry,
            persistence,
            resources,
            sender_receipts: true,
        }
    }

    /// Enable or disable the `ack` sent back to the sender after a save.
    #[must_use]
    pub fn with_sender_receipts(mut self, enabled: bool) -> Self {
        self.sender_receipts = enabled;
        self
    }

    /// Registry this router delivers through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one message received on `origin`.
    pub async fn route(&self, origin: &Arc<Connection>, message: ChatMessage) {
        let kind = match message.kind {
            MessageType::Send => "send",
            MessageType::Ack => "ack",
            MessageType::Fail => "fail",
        };
        counter!(CHAT_MESSAGES_RECEIVED_TOTAL, "type" => kind).increment(1);

        match message.kind {
            MessageType::Send => self.deliver(origin, message).await,
            MessageType::Ack => {
                let _ = self.acknowledge(origin, &message);
            }
            MessageType::Fail => {
                warn!(
                    user_id = %origin.user_id(),
                    temp_id = %message.temp_id,
                    "clients may not send fail messages, ignoring"
                );
            }
        }
    }

    /// Persist a `send` and hand it to the recipient if online.
    #[instrument(skip_all, fields(from = %origin.user_id(), to = %message.to, temp_id = %message.temp_id))]
    pub async fn deliver(&self, origin: &Arc<Connection>, mut message: ChatMessage) {
        if message.from != *origin.user_id() {
            if !message.from.is_empty() {
                warn!(claimed = %message.from, "sender mismatch, using connection user");
            }
            message.from = origin.user_id().clone();
        }

        if message.to.is_empty() {
            Self::reject(origin, &message, "missing_recipient");
            return;
        }

        let outgoing = match self.resolve_media(&message).await {
            Ok(outgoing) => outgoing,
            Err(e) => {
                warn!(error = %e, "media resolution failed");
                Self::reject(origin, &message, e.error_kind());
                return;
            }
        };

        let id = match self.persistence.save_message(&outgoing).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to persist message");
                Self::reject(origin, &message, e.error_kind());
                return;
            }
        };
        let outgoing = outgoing.with_id(id);

        if self.sender_receipts {
            // A receipt that cannot be queued is already logged by enqueue.
            let _ = origin.enqueue(outgoing.to_sender_receipt());
        }

        let Some(recipient) = self.registry.lookup(&outgoing.to) else {
            self.store_for_offline(&outgoing).await;
            return;
        };

        // Track before enqueueing: the write pump may flush the message and
        // the recipient's ack may come back before enqueue returns.
        recipient.track_pending(outgoing.clone());
        match recipient.enqueue(outgoing.clone()) {
            Err(EnqueueError::Closed) => {
                let _ = recipient.pending().acknowledge(&outgoing.id);
                self.store_for_offline(&outgoing).await;
            }
            Ok(()) | Err(EnqueueError::Full) => {
                counter!(CHAT_MESSAGES_DELIVERED_TOTAL).increment(1);
                debug!(message_id = %outgoing.id, "message queued for recipient");
            }
        }
    }

    /// Clear the pending entry an `ack` refers to.
    ///
    /// The entry lives on the connection the message was delivered to, which
    /// is normally the one the ack arrives on. Unknown ids are ignored.
    pub fn acknowledge(&self, origin: &Arc<Connection>, ack: &ChatMessage) -> bool {
        if ack.id.is_empty() {
            debug!(user_id = %origin.user_id(), "ack without id, ignoring");
            return false;
        }

        let mut matched = origin.pending().acknowledge(&ack.id);
        if !matched && !ack.to.is_empty() && ack.to != *origin.user_id() {
            if let Some(other) = self.registry.lookup(&ack.to) {
                matched = other.pending().acknowledge(&ack.id);
            }
        }

        counter!(CHAT_ACKS_TOTAL, "matched" => if matched { "true" } else { "false" }).increment(1);
        debug!(user_id = %origin.user_id(), message_id = %ack.id, matched, "ack received");
        matched
    }

    async fn resolve_media(&self, message: &ChatMessage) -> Result<ChatMessage, GatewayError> {
        if !message.media_type.is_media() || is_absolute_url(&message.content) {
            return Ok(message.clone());
        }
        let url = self
            .resources
            .resolve_media_url(&message.conversation_id(), &message.content)
            .await?;
        Ok(message.with_content(url))
    }

    async fn store_for_offline(&self, message: &ChatMessage) {
        counter!(CHAT_MESSAGES_OFFLINE_TOTAL).increment(1);
        info!(message_id = %message.id, "recipient offline, recording read marker");
        if let Err(e) = self
            .persistence
            .record_last_read_message(&message.from, &message.to, &message.id)
            .await
        {
            warn!(error = %e, message_id = %message.id, "failed to record last read message");
        }
    }

    fn reject(origin: &Connection, message: &ChatMessage, reason: &'static str) {
        counter!(CHAT_MESSAGES_FAILED_TOTAL, "reason" => reason).increment(1);
        let _ = origin.enqueue(message.to_fail());
    }
}

fn is_absolute_url(content: &str) -> bool {
    content.starts_with("http://") || content.starts_with("https://")
}
