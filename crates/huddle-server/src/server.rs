use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::connection::{self, ConnectionOptions};
use crate::hub::{self, HubEvent};
use crate::relay::Relay;
use crate::transport::ClientRegistry;

/// Origins accepted when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:3000",
    "https://playful-monstera-e9a479.netlify.app",
];

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Exact-match list of browser origins allowed to connect.
    pub allowed_origins: Vec<String>,
    pub max_send_queue: usize,
    pub hub_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let connection = ConnectionOptions::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| (*o).to_string())
                .collect(),
            max_send_queue: 256,
            hub_queue: 1024,
            heartbeat_interval: connection.heartbeat_interval,
            client_timeout: connection.client_timeout,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub client_registry: Arc<ClientRegistry>,
    pub hub_tx: mpsc::Sender<HubEvent>,
    pub allowed_origins: Arc<[String]>,
    pub connection: ConnectionOptions,
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route("/", get(status_handler))
        .route("/health", get(status_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparseable allowed origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(values))
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
}

/// Requests without an `Origin` header come from non-browser clients and are
/// let through.
pub fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    match headers.get(ORIGIN) {
        None => true,
        Some(origin) => origin
            .to_str()
            .is_ok_and(|origin| allowed.iter().any(|a| a == origin)),
    }
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    let shutdown = CancellationToken::new();
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    let (hub_tx, hub_rx) = mpsc::channel::<HubEvent>(config.hub_queue);
    let hub_handle = hub::spawn(
        Relay::new(Arc::clone(&client_registry)),
        hub_rx,
        shutdown.clone(),
    );

    let state = AppState {
        client_registry,
        hub_tx,
        allowed_origins: config.allowed_origins.clone().into(),
        connection: ConnectionOptions {
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
        },
        shutdown: shutdown.clone(),
    };
    let router = build_router(state);

    tracing::info!(
        port = local_addr.port(),
        origins = config.allowed_origins.len(),
        "Huddle server started"
    );

    let serve_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server: server_handle,
        hub: hub_handle,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    hub: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, close live sockets and wait for the hub
    /// to finish the event it is handling.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "Server task ended abnormally");
        }
        if let Err(e) = self.hub.await {
            tracing::warn!(error = %e, "Hub task ended abnormally");
        }
        tracing::info!("Process terminated");
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl-C received, shutting down gracefully"),
        () = terminate => tracing::info!("SIGTERM received, shutting down gracefully"),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !origin_allowed(&state.allowed_origins, &headers) {
        tracing::warn!(origin = ?headers.get(ORIGIN), "Rejected connection from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.client_registry.register();

    connection::handle_ws_connection(
        socket,
        connection_id,
        rx,
        state.client_registry,
        state.hub_tx,
        state.connection,
        state.shutdown,
    )
    .await;
}

/// Status endpoint: session and group counts, answered by the hub.
async fn status_handler(State(state): State<AppState>) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.hub_tx.send(HubEvent::Status(reply_tx)).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match reply_rx.await {
        Ok(status) => Json(status).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
