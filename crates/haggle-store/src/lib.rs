//! # haggle-store
//!
//! `SQLite` persistence for chat messages and per-user conversation rows,
//! plus a static media URL resolver.
//!
//! [`SqliteStore`] implements [`haggle_core::PersistenceGateway`];
//! [`StaticResourceGateway`] implements [`haggle_core::ResourceGateway`].

#![deny(unsafe_code)]

pub mod conversations;
pub mod database;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod schema;

pub use conversations::{ConversationRepo, ConversationRow};
pub use database::Database;
pub use error::StoreError;
pub use gateway::{SqliteStore, StaticResourceGateway};
pub use messages::{MessageRepo, StoredMessage};
