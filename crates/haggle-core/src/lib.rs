//! # haggle-core
//!
//! Shared building blocks for the buyer/seller messaging core.
//!
//! - [`message`]: the wire/domain [`ChatMessage`] and its type tags
//! - [`ids`]: branded identifiers for users, messages and connections
//! - [`backoff`]: integer-shift retry delays for unacknowledged messages
//! - [`gateway`]: the persistence and media collaborators the router calls
//! - [`errors`]: gateway error taxonomy
//! - [`logging`]: `tracing` subscriber setup for binaries

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod gateway;
pub mod ids;
pub mod logging;
pub mod message;

pub use errors::GatewayError;
pub use gateway::{PersistenceGateway, ResourceGateway};
pub use ids::{ConnectionId, MessageId, UserId};
pub use message::{ChatMessage, MediaType, MessageType, conversation_id};
