//! One accepted chat socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use haggle_core::backoff::RetryPolicy;
use haggle_core::{ChatMessage, ConnectionId, UserId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::CHAT_OUTBOUND_DROPS_TOTAL;
use crate::pending::PendingTracker;

/// Why a message could not be placed on an outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The connection is closing or closed.
    #[error("outbound queue closed")]
    Closed,
}

impl EnqueueError {
    fn reason(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// A registered chat connection.
///
/// Producers (routers on other connections, retry timers) push onto the
/// bounded outbound queue; the write pump is the only consumer and the only
/// writer to the socket. Closing the queue makes the write pump send a close
/// frame and stop.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    outbound: Mutex<Option<mpsc::Sender<ChatMessage>>>,
    pending: PendingTracker,
    retry: RetryPolicy,
    connected_at: Instant,
    dropped: AtomicU64,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    pub fn new(
        user_id: UserId,
        queue_capacity: usize,
        retry: RetryPolicy,
    ) -> (Arc<Self>, mpsc::Receiver<ChatMessage>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::generate(),
            user_id,
            outbound: Mutex::new(Some(tx)),
            pending: PendingTracker::new(),
            retry,
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
        });
        (connection, rx)
    }

    /// Unique id of this socket.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// User this socket belongs to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Messages awaiting an ack from this connection's user.
    pub fn pending(&self) -> &PendingTracker {
        &self.pending
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Total messages that could not be enqueued.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the outbound queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.outbound.lock().as_ref().is_none_or(mpsc::Sender::is_closed)
    }

    /// Push a message onto the outbound queue without waiting.
    pub fn enqueue(&self, message: ChatMessage) -> Result<(), EnqueueError> {
        let result = match self.outbound.lock().as_ref() {
            Some(tx) => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            }),
            None => Err(EnqueueError::Closed),
        };

        if let Err(e) = result {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(CHAT_OUTBOUND_DROPS_TOTAL, "reason" => e.reason()).increment(1);
            warn!(
                user_id = %self.user_id,
                connection_id = %self.id,
                error = %e,
                "failed to enqueue outbound message"
            );
        }
        result
    }

    /// Start retrying `message` until the user acks it or retries run out.
    pub fn track_pending(self: &Arc<Self>, message: ChatMessage) {
        self.pending.track(message, Arc::downgrade(self), self.retry);
    }

    /// Close the outbound queue and cancel pending retries.
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let sender = self.outbound.lock().take();
        let cancelled = self.pending.cancel_all();
        if cancelled > 0 {
            debug!(
                user_id = %self.user_id,
                connection_id = %self.id,
                cancelled,
                "pending deliveries cancelled on close"
            );
        }
        sender.is_some()
    }
}
