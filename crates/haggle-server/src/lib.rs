//! # haggle-server
//!
//! Real-time buyer/seller chat over WebSocket.
//!
//! - [`registry`]: one active [`Connection`] per user
//! - [`connection`]: bounded outbound queue plus pending deliveries
//! - [`pending`]: ack tracking and exponential resend timers
//! - [`router`]: persist → route → acknowledge for every inbound message
//! - [`session`]: read/write pumps and guaranteed cleanup
//! - [`server`]: Axum routes (`/api/im/ws`, `/health`, `/metrics`)

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod health;
pub mod metrics;
pub mod pending;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use connection::{Connection, EnqueueError};
pub use registry::ConnectionRegistry;
pub use router::MessageRouter;
pub use server::{AppState, CHAT_WS_PATH, HaggleServer};
