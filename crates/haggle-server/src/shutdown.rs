//! Graceful shutdown of the chat server.
//!
//! Shutdown runs in three steps. The token is cancelled so the listener
//! stops and new upgrades are refused. Every registered connection's queue
//! is closed so its write pump sends a close frame. Then the coordinator
//! waits for the tracked sessions and the given task handles to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown of the listener and live chat sessions.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
    registry: Arc<ConnectionRegistry>,
}

impl ShutdownCoordinator {
    /// Coordinator for the sessions registered in `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
            registry,
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so shutdown waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Sessions that have not finished yet.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stop accepting, close every chat connection, then wait up to
    /// `timeout` for sessions and `handles` to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let closed = self.registry.close_all();
        let _ = self.sessions.close();
        info!(
            closed,
            sessions = self.sessions.len(),
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "closing chat connections"
        );

        let drain = async {
            self.sessions.wait().await;
            let _ = futures::future::join_all(handles).await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                sessions = self.sessions.len(),
                "shutdown timed out after {timeout:?}, some sessions may still be running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use haggle_core::UserId;
    use haggle_core::backoff::RetryPolicy;

    use super::*;
    use crate::connection::Connection;

    fn coordinator() -> (Arc<ConnectionRegistry>, ShutdownCoordinator) {
        let registry = Arc::new(ConnectionRegistry::new());
        let coord = ShutdownCoordinator::new(Arc::clone(&registry));
        (registry, coord)
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let (_, coord) = coordinator();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.active_sessions(), 0);
    }

    #[test]
    fn token_propagation() {
        let (_, coord) = coordinator();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_closes_connections_and_waits_for_their_sessions() {
        let (registry, coord) = coordinator();
        let (conn, mut outbound) = Connection::new(UserId::from("alice"), 4, RetryPolicy::default());
        let _ = registry.register(UserId::from("alice"), Arc::clone(&conn));

        // stands in for a write pump: runs until the queue is closed
        let session = tokio::spawn(coord.track_session(async move {
            while outbound.recv().await.is_some() {}
        }));
        assert_eq!(coord.active_sessions(), 1);

        coord
            .graceful_shutdown(Vec::new(), Some(Duration::from_secs(1)))
            .await;

        assert!(coord.is_shutting_down());
        assert!(conn.is_closed());
        assert_eq!(coord.active_sessions(), 0);
        session.await.unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_tasks() {
        let (_, coord) = coordinator();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });
        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(1)))
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_session_times_out() {
        let (_, coord) = coordinator();
        let _stuck = tokio::spawn(coord.track_session(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        coord
            .graceful_shutdown(Vec::new(), Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
        assert_eq!(coord.active_sessions(), 1);
    }
}
