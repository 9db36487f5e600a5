//! Server configuration.

use std::time::Duration;

use haggle_core::backoff::RetryPolicy;
use haggle_settings::HaggleSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Keepalive ping interval in seconds.
    pub keepalive_interval_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Resends before an unacknowledged message is dropped.
    pub max_retries: u32,
    /// Base of the resend backoff in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Send the sender an `ack` with the assigned id after each save.
    pub sender_receipts: bool,
}

impl ServerConfig {
    /// Keepalive interval as a [`Duration`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Retry policy for pending deliveries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay_ms)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            outbound_queue_capacity: 256,
            keepalive_interval_secs: 60,
            max_message_size: 64 * 1024,
            max_retries: 3,
            retry_base_delay_ms: 500,
            sender_receipts: true,
        }
    }
}

impl From<&HaggleSettings> for ServerConfig {
    fn from(settings: &HaggleSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            outbound_queue_capacity: settings.server.outbound_queue_capacity,
            keepalive_interval_secs: settings.server.keepalive_interval_secs,
            max_message_size: settings.server.max_message_size,
            max_retries: settings.delivery.max_retries,
            retry_base_delay_ms: settings.delivery.retry_base_delay_ms,
            sender_receipts: settings.delivery.sender_receipts,
        }
    }
}
