//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections closed because the same user connected again (counter).
pub const WS_SUPERSEDED_TOTAL: &str = "ws_superseded_total";
/// Frames that failed to decode (counter).
pub const CHAT_MALFORMED_FRAMES_TOTAL: &str = "chat_malformed_frames_total";
/// Decoded inbound messages (counter, labels: type).
pub const CHAT_MESSAGES_RECEIVED_TOTAL: &str = "chat_messages_received_total";
/// Messages handed to an online recipient (counter).
pub const CHAT_MESSAGES_DELIVERED_TOTAL: &str = "chat_messages_delivered_total";
/// Messages stored for an offline recipient (counter).
pub const CHAT_MESSAGES_OFFLINE_TOTAL: &str = "chat_messages_offline_total";
/// `fail` notices sent to senders (counter, labels: reason).
pub const CHAT_MESSAGES_FAILED_TOTAL: &str = "chat_messages_failed_total";
/// Outbound enqueue failures (counter, labels: reason).
pub const CHAT_OUTBOUND_DROPS_TOTAL: &str = "chat_outbound_drops_total";
/// Frames written to sockets (counter).
pub const CHAT_FRAMES_SENT_TOTAL: &str = "chat_frames_sent_total";
/// Resends of unacknowledged messages (counter).
pub const CHAT_DELIVERY_RETRIES_TOTAL: &str = "chat_delivery_retries_total";
/// Pending messages dropped after the last retry (counter).
pub const CHAT_PENDING_EXPIRED_TOTAL: &str = "chat_pending_expired_total";
/// Acks received (counter, labels: matched).
pub const CHAT_ACKS_TOTAL: &str = "chat_acks_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_SUPERSEDED_TOTAL,
            CHAT_MALFORMED_FRAMES_TOTAL,
            CHAT_MESSAGES_RECEIVED_TOTAL,
            CHAT_MESSAGES_DELIVERED_TOTAL,
            CHAT_MESSAGES_OFFLINE_TOTAL,
            CHAT_MESSAGES_FAILED_TOTAL,
            CHAT_OUTBOUND_DROPS_TOTAL,
            CHAT_FRAMES_SENT_TOTAL,
            CHAT_DELIVERY_RETRIES_TOTAL,
            CHAT_PENDING_EXPIRED_TOTAL,
            CHAT_ACKS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
