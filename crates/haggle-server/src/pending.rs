//! Unacknowledged deliveries and their retry timers.
//!
//! Each pending message owns one timer task. The task sleeps for the next
//! backoff delay, then asks the tracker what to do: resend through the
//! owning connection's outbound queue, or drop the entry once the retry
//! budget is spent. An ack removes the entry and aborts the task.

use std::collections::HashMap;
use std::sync::Weak;

use haggle_core::backoff::RetryPolicy;
use haggle_core::{ChatMessage, MessageId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::metrics::{CHAT_DELIVERY_RETRIES_TOTAL, CHAT_PENDING_EXPIRED_TOTAL};

/// A delivered message waiting for the recipient's ack.
#[derive(Debug)]
struct PendingMessage {
    message: ChatMessage,
    retries: u32,
    next_attempt_at: Instant,
    timer: JoinHandle<()>,
}

/// Outcome of a timer firing.
#[derive(Debug, PartialEq, Eq)]
enum RetryStep {
    Resend { message: ChatMessage, attempt: u32 },
    Expired,
    Gone,
}

/// Per-connection map of pending messages keyed by message id.
#[derive(Debug, Default)]
pub struct PendingTracker {
    entries: Mutex<HashMap<MessageId, PendingMessage>>,
}

impl PendingTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages awaiting an ack.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is awaiting an ack.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `id` is awaiting an ack.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Retries already made for `id`.
    pub fn retries(&self, id: &MessageId) -> Option<u32> {
        self.entries.lock().get(id).map(|p| p.retries)
    }

    /// When the timer for `id` fires next.
    pub fn next_attempt_at(&self, id: &MessageId) -> Option<Instant> {
        self.entries.lock().get(id).map(|p| p.next_attempt_at)
    }

    /// Start tracking `message` and arm its first timer.
    ///
    /// Re-tracking an id already pending restarts its schedule.
    pub(crate) fn track(&self, message: ChatMessage, owner: Weak<Connection>, policy: RetryPolicy) {
        let id = message.id.clone();
        let first_delay = policy.initial_delay();

        // Spawn under the lock so the timer cannot look up the entry before
        // it exists.
        let mut entries = self.entries.lock();
        let timer = tokio::spawn(retry_loop(owner, id.clone(), policy));
        let previous = entries.insert(
            id,
            PendingMessage {
                message,
                retries: 0,
                next_attempt_at: Instant::now() + first_delay,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
    }

    /// Remove `id` and stop its timer. Returns `false` for unknown ids.
    pub fn acknowledge(&self, id: &MessageId) -> bool {
        match self.entries.lock().remove(id) {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every entry and stop every timer. Returns how many were removed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingMessage> = self.entries.lock().drain().map(|(_, p)| p).collect();
        for pending in &drained {
            pending.timer.abort();
        }
        drained.len()
    }

    /// Advance the entry for `id` after its timer fired.
    fn on_timer(&self, id: &MessageId, policy: RetryPolicy) -> RetryStep {
        let mut entries = self.entries.lock();
        let Some(pending) = entries.get_mut(id) else {
            return RetryStep::Gone;
        };

        if pending.retries >= policy.max_retries {
            let _ = entries.remove(id);
            return RetryStep::Expired;
        }

        pending.retries += 1;
        pending.next_attempt_at = Instant::now() + policy.delay_after(pending.retries);
        RetryStep::Resend {
            message: pending.message.clone(),
            attempt: pending.retries,
        }
    }
}

async fn retry_loop(owner: Weak<Connection>, id: MessageId, policy: RetryPolicy) {
    let mut delay = policy.initial_delay();
    loop {
        tokio::time::sleep(delay).await;

        let Some(connection) = owner.upgrade() else {
            return;
        };

        match connection.pending().on_timer(&id, policy) {
            RetryStep::Resend { message, attempt } => {
                counter!(CHAT_DELIVERY_RETRIES_TOTAL).increment(1);
                debug!(
                    user_id = %connection.user_id(),
                    message_id = %id,
                    attempt,
                    "resending unacknowledged message"
                );
                // Failure is already logged; the next attempt covers it.
                let _ = connection.enqueue(message);
                delay = policy.delay_after(attempt);
            }
            RetryStep::Expired => {
                counter!(CHAT_PENDING_EXPIRED_TOTAL).increment(1);
                warn!(
                    user_id = %connection.user_id(),
                    message_id = %id,
                    max_retries = policy.max_retries,
                    "message unacknowledged after max retries, dropping"
                );
                return;
            }
            RetryStep::Gone => return,
        }
    }
}
