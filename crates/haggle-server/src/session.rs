//! Per-connection lifecycle: the read pump, the write pump and cleanup.
//!
//! The write pump is the only task that writes to the socket. The read pump
//! decodes frames and hands them to the router inline, so messages from one
//! sender are routed in arrival order.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use haggle_core::backoff::RetryPolicy;
use haggle_core::{ChatMessage, UserId};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::metrics::{
    CHAT_FRAMES_SENT_TOTAL, CHAT_MALFORMED_FRAMES_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;

/// How long cleanup waits for the write pump to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drain `outbound` into `sink`, pinging every `keepalive`.
///
/// Ends when the queue is closed (after sending a close frame) or when a
/// write fails.
pub async fn write_pump<S>(mut sink: S, mut outbound: mpsc::Receiver<ChatMessage>, keepalive: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping_interval = tokio::time::interval(keepalive);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(message) = msg else {
                    debug!("outbound queue closed, sending close frame");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, message_id = %message.id, "failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "socket write failed");
                    break;
                }
                counter!(CHAT_FRAMES_SENT_TOTAL).increment(1);
            }
            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    debug!(error = %e, "keepalive ping failed");
                    break;
                }
            }
        }
    }
}

/// Read frames from `stream` and route each decoded message.
///
/// Returns on a read error, a close frame or end of stream. Frames that are
/// not data, or fail to decode, are logged and skipped.
pub async fn read_pump<St, E>(mut stream: St, connection: Arc<Connection>, router: Arc<MessageRouter>)
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "socket read failed");
                break;
            }
        };

        // Text or UTF-8 binary frames carry messages
        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    s.to_owned()
                } else {
                    info!(len = data.len(), "received non-UTF8 binary frame, skipping");
                    continue;
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match ChatMessage::from_json(&text) {
            Ok(message) => router.route(&connection, message).await,
            Err(e) => {
                counter!(CHAT_MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(error = %e, len = text.len(), "malformed frame dropped");
            }
        }
    }
}

/// Settings a session needs beyond the shared registry and router.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Keepalive ping interval.
    pub keepalive: Duration,
    /// Retry schedule for deliveries to this connection.
    pub retry: RetryPolicy,
}

/// Run one chat connection from upgrade to disconnect.
///
/// Registers the connection, runs both pumps, and on whichever exits first
/// unregisters (only if still current), closes the queue and cancels pending
/// retries.
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn run_session<S>(
    socket: S,
    user_id: UserId,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    options: SessionOptions,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Send + 'static,
{
    let (connection, outbound) = Connection::new(user_id.clone(), options.queue_capacity, options.retry);
    let started = Instant::now();

    let _ = registry.register(user_id.clone(), Arc::clone(&connection));
    info!(connection_id = %connection.id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, outbound, options.keepalive));
    let reader = read_pump(stream, Arc::clone(&connection), router);

    let writer_done = tokio::select! {
        () = reader => false,
        _ = &mut writer => true,
    };

    let removed = registry.remove_if_current(&user_id, connection.id());
    let _ = connection.close();
    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(connection_id = %connection.id(), removed, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use haggle_core::{
        GatewayError, MediaType, MessageId, MessageType, PersistenceGateway, ResourceGateway,
    };

    use super::*;

    #[derive(Default)]
    struct CountingStore {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceGateway for CountingStore {
        async fn save_message(&self, _message: &ChatMessage) -> Result<MessageId, GatewayError> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(MessageId::from_raw(format!("m{n}")))
        }

        async fn record_last_read_message(
            &self,
            _from: &UserId,
            _to: &UserId,
            _last_message_id: &MessageId,
        ) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    struct NoMedia;

    #[async_trait]
    impl ResourceGateway for NoMedia {
        async fn resolve_media_url(&self, _c: &str, key: &str) -> Result<String, GatewayError> {
            Ok(key.to_owned())
        }
    }

    fn text_frame(message: &ChatMessage) -> Message {
        Message::Text(message.to_json().unwrap().into())
    }

    fn hello(temp_id: &str) -> ChatMessage {
        ChatMessage::send(temp_id, "alice", "bob", "hi", MediaType::Text)
    }

    #[tokio::test]
    async fn write_pump_sends_json_then_close() {
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(write_pump(sink, rx, Duration::from_secs(60)));

        tx.send(hello("t1")).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        let Some(Message::Text(text)) = frames.next().await else {
            panic!("expected a text frame");
        };
        assert_eq!(ChatMessage::from_json(&text).unwrap(), hello("t1"));
        assert!(matches!(frames.next().await, Some(Message::Close(None))));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn write_pump_pings_on_keepalive() {
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel::<ChatMessage>(4);
        let pump = tokio::spawn(write_pump(sink, rx, Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(matches!(frames.next().await, Some(Message::Ping(_))));

        drop(tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn write_pump_stops_on_write_error() {
        let (sink, frames) = fmpsc::unbounded::<Message>();
        drop(frames);
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(write_pump(sink, rx, Duration::from_secs(60)));

        tx.send(hello("t1")).await.unwrap();
        pump.await.unwrap();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn read_pump_routes_data_frames_until_close() {
        let store = Arc::new(CountingStore::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            store.clone(),
            Arc::new(NoMedia),
        ));
        let (alice, _alice_rx) = Connection::new(UserId::from("alice"), 16, RetryPolicy::default());
        let (bob, mut bob_rx) = Connection::new(UserId::from("bob"), 16, RetryPolicy::default());
        let _ = registry.register(UserId::from("alice"), Arc::clone(&alice));
        let _ = registry.register(UserId::from("bob"), Arc::clone(&bob));

        let binary = hello("t2").to_json().unwrap().into_bytes();
        let frames = vec![
            Ok::<_, Infallible>(Message::Ping(Vec::new().into())),
            Ok(Message::Text("{not json".into())),
            Ok(text_frame(&hello("t1"))),
            Ok(Message::Binary(vec![0xff, 0xfe].into())),
            Ok(Message::Binary(binary.into())),
            Ok(Message::Close(None)),
            Ok(text_frame(&hello("t3"))),
        ];
        read_pump(futures::stream::iter(frames), alice, router).await;

        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        let first = bob_rx.recv().await.unwrap();
        let second = bob_rx.recv().await.unwrap();
        assert_eq!((first.temp_id.as_str(), first.kind), ("t1", MessageType::Send));
        assert_eq!(second.temp_id, "t2");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_pump_stops_on_transport_error() {
        let store = Arc::new(CountingStore::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(registry, store.clone(), Arc::new(NoMedia)));
        let (alice, _rx) = Connection::new(UserId::from("alice"), 16, RetryPolicy::default());

        let frames = vec![Err("connection reset"), Ok(text_frame(&hello("t1")))];
        read_pump(futures::stream::iter(frames), alice, router).await;
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }
}
