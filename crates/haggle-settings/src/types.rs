//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every struct is `#[serde(default)]`,
//! so a partial settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings for the chat server.
///
/// ```json
/// {
///   "server": { "port": 3300, "outboundQueueCapacity": 256 },
///   "delivery": { "maxRetries": 3, "retryBaseDelayMs": 500 },
///   "storage": { "dbPath": "/var/lib/haggle/chat.db" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HaggleSettings {
    /// Listener and per-connection limits.
    pub server: ServerSettings,
    /// Acknowledgement and retry behavior.
    pub delivery: DeliverySettings,
    /// Message database location.
    pub storage: StorageSettings,
    /// Media URL resolution.
    pub media: MediaSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Seconds between keepalive pings.
    pub keepalive_interval_secs: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3300,
            outbound_queue_capacity: 256,
            keepalive_interval_secs: 60,
            max_message_size: 64 * 1024,
        }
    }
}

/// Acknowledgement and retry behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Resends before an unacknowledged message is dropped.
    pub max_retries: u32,
    /// Base of the exponential resend delay, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Send the sender an `ack` carrying the assigned id after persisting.
    pub sender_receipts: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 500,
            sender_receipts: true,
        }
    }
}

/// Message database location.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// `SQLite` file path. Empty means `~/.haggle/haggle.db`.
    pub db_path: String,
}

/// Media URL resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    /// Public prefix for uploaded media objects.
    pub base_url: String,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3300/media".to_string(),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
