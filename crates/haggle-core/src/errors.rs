//! Errors raised by the external collaborators of the router.

use thiserror::Error;

/// Failure reported by a [`PersistenceGateway`](crate::PersistenceGateway)
/// or [`ResourceGateway`](crate::ResourceGateway).
///
/// The router never retries these; a failed save is surfaced to the sender
/// as a `fail` message and logged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The backing store could not complete the operation.
    #[error("storage error: {0}")]
    Storage(String),
    /// The message was refused before touching storage.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// A media object key could not be turned into a URL.
    #[error("media resolution failed: {0}")]
    Media(String),
}

impl GatewayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Media(_) => "media",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = GatewayError::Storage("disk full".into());
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GatewayError::Storage(String::new()).error_kind(), "storage");
        assert_eq!(
            GatewayError::InvalidMessage(String::new()).error_kind(),
            "invalid_message"
        );
        assert_eq!(GatewayError::Media(String::new()).error_kind(), "media");
    }
}
