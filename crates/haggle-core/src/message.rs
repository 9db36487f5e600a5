//! Chat message wire model.
//!
//! Every frame exchanged over a chat socket is one JSON-encoded
//! [`ChatMessage`]:
//!
//! ```json
//! {"tempID":"t1","id":"","from":"alice","to":"bob",
//!  "content":"hi","mediaType":"text","type":1}
//! ```
//!
//! The `type` tag is numeric on the wire (`1` send, `2` ack, `3` fail).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{MessageId, UserId};

/// Protocol role of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    /// Client → server → recipient chat payload.
    Send = 1,
    /// Receipt confirming a message id was received.
    Ack = 2,
    /// Server → sender notice that a send could not be persisted.
    Fail = 3,
}

/// A numeric `type` tag outside the known range.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub u8);

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Send),
            2 => Ok(Self::Ack),
            3 => Ok(Self::Fail),
            other => Err(UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// Kind of payload carried in `content`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Plain text.
    #[default]
    Text,
    /// Image object key or URL.
    Image,
    /// Video object key or URL.
    Video,
    /// Product link.
    Link,
}

impl MediaType {
    /// Whether `content` refers to an uploaded media object.
    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }

    /// Wire name (`"text"`, `"image"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Link => "link",
        }
    }
}

/// One chat frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-local correlation id, echoed back in receipts and failures.
    #[serde(rename = "tempID", default)]
    pub temp_id: String,
    /// Durable id, empty until persisted.
    #[serde(default)]
    pub id: MessageId,
    /// Sending user.
    #[serde(default)]
    pub from: UserId,
    /// Receiving user.
    #[serde(default)]
    pub to: UserId,
    /// Text body, media key/URL or product link.
    #[serde(default)]
    pub content: String,
    /// Payload kind.
    #[serde(rename = "mediaType", default)]
    pub media_type: MediaType,
    /// Protocol role.
    #[serde(rename = "type")]
    pub kind: MessageType,
}

impl ChatMessage {
    /// Build a `send` message as a client would.
    pub fn send(
        temp_id: impl Into<String>,
        from: impl Into<UserId>,
        to: impl Into<UserId>,
        content: impl Into<String>,
        media_type: MediaType,
    ) -> Self {
        Self {
            temp_id: temp_id.into(),
            id: MessageId::default(),
            from: from.into(),
            to: to.into(),
            content: content.into(),
            media_type,
            kind: MessageType::Send,
        }
    }

    /// Build an `ack` for a delivered message id.
    pub fn ack(id: MessageId, from: impl Into<UserId>, to: impl Into<UserId>) -> Self {
        Self {
            temp_id: String::new(),
            id,
            from: from.into(),
            to: to.into(),
            content: String::new(),
            media_type: MediaType::Text,
            kind: MessageType::Ack,
        }
    }

    /// Decode a frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Copy of this message carrying the durable id.
    #[must_use]
    pub fn with_id(&self, id: MessageId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    /// Copy of this message with `content` replaced.
    #[must_use]
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }

    /// The `fail` notice returned to the sender: same payload, `id := tempID`.
    #[must_use]
    pub fn to_fail(&self) -> Self {
        Self {
            id: MessageId::from_raw(self.temp_id.clone()),
            kind: MessageType::Fail,
            ..self.clone()
        }
    }

    /// Receipt returned to the sender once the message is persisted.
    ///
    /// Carries the assigned `id` alongside the original `tempID` so the
    /// client can reconcile its optimistic copy. The payload is not echoed.
    #[must_use]
    pub fn to_sender_receipt(&self) -> Self {
        Self {
            temp_id: self.temp_id.clone(),
            id: self.id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            content: String::new(),
            media_type: self.media_type,
            kind: MessageType::Ack,
        }
    }

    /// Conversation this message belongs to.
    pub fn conversation_id(&self) -> String {
        conversation_id(&self.from, &self.to)
    }
}

/// Direction-independent conversation key: `"{lower}:{higher}"`.
pub fn conversation_id(a: &UserId, b: &UserId) -> String {
    if a > b {
        format!("{b}:{a}")
    } else {
        format!("{a}:{b}")
    }
}
