//! `HaggleServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use haggle_core::{PersistenceGateway, ResourceGateway, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::session::{self, SessionOptions};
use crate::shutdown::ShutdownCoordinator;

/// Path of the chat upgrade endpoint.
pub const CHAT_WS_PATH: &str = "/api/im/ws";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Inbound message dispatch.
    pub router: Arc<MessageRouter>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The chat server.
pub struct HaggleServer {
    state: AppState,
}

impl HaggleServer {
    /// Create a server over the given storage and media collaborators.
    pub fn new(
        config: ServerConfig,
        persistence: Arc<dyn PersistenceGateway>,
        resources: Arc<dyn ResourceGateway>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry), persistence, resources)
            .with_sender_receipts(config.sender_receipts);
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&registry)));
        Self {
            state: AppState {
                registry,
                router: Arc::new(router),
                shutdown,
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route(CHAT_WS_PATH, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Bind the configured address and serve until shutdown is requested.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config().bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown().token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "server error");
            }
        });

        info!(%addr, path = CHAT_WS_PATH, "chat server listening");
        Ok((addr, handle))
    }

    /// Stop accepting, close every chat connection, and wait for the
    /// sessions and `handles` to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        self.state.shutdown.graceful_shutdown(handles, timeout).await;
    }
}

/// Query string of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Connecting user.
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
}

/// GET /api/im/ws?userID=...
///
/// The user id is checked before the upgrade so a bad request never gets a
/// socket.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing user id").into_response();
    };
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let options = SessionOptions {
        queue_capacity: state.config.outbound_queue_capacity,
        keepalive: state.config.keepalive_interval(),
        retry: state.config.retry_policy(),
    };
    let registry = Arc::clone(&state.registry);
    let router = Arc::clone(&state.router);
    let shutdown = Arc::clone(&state.shutdown);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track_session(session::run_session(
                socket,
                UserId::new(user_id),
                registry,
                router,
                options,
            ))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
