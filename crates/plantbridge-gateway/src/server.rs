use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use plantbridge_core::{BridgeError, NodeId, Value, VariableDescriptor, VariableSnapshot};
use plantbridge_process::{History, HistorySample};
use plantbridge_security::Credentials;
use plantbridge_session::{CloseReason, SessionManager};
use plantbridge_telemetry::{MetricSample, MetricsRecorder};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection::{self, ClientConnection, ConnectionConfig, Farewell};
use crate::registry::{self, ClientRegistry};

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub connection: ConnectionConfig,
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            connection: ConnectionConfig::default(),
            max_message_size: 64 * 1024,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<ClientRegistry>,
    pub history: Arc<History>,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Arc<GatewayConfig>,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionManager>,
        history: Arc<History>,
        metrics: Arc<MetricsRecorder>,
        config: GatewayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            registry: Arc::new(ClientRegistry::new(Arc::clone(&metrics))),
            history,
            metrics,
            config: Arc::new(config),
            started_at: Instant::now(),
            shutdown,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{id}", get(read_node).post(write_node))
        .route("/nodes/{id}/history", get(node_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve until the shutdown token fires.
pub async fn start(state: AppState) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let heartbeat = state.config.connection.heartbeat_interval;
    let cleanup = registry::start_cleanup_task(
        Arc::clone(&state.registry),
        heartbeat,
        heartbeat * 3,
        state.shutdown.clone(),
    );

    let shutdown = state.shutdown.clone();
    let clients = Arc::clone(&state.registry);
    let router = build_router(state);

    tracing::info!(addr = %local_addr, "gateway listening");

    let server = tokio::spawn(async move {
        let signal = async move {
            shutdown.cancelled().await;
            let closing = clients.close_all(&Farewell::going_away());
            tracing::info!(clients = closing, "gateway shutting down");
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
        {
            tracing::error!(error = %e, "gateway server failed");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`. Dropping it leaves the tasks running.
pub struct ServerHandle {
    pub addr: SocketAddr,
    server: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Background tasks, for a graceful shutdown to await.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        vec![self.server, self.cleanup]
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// A [`BridgeError`] rendered as `{code, message}` with its HTTP status.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ── WebSocket ───────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Arc::new(ClientConnection::new(
        state.config.connection.clone(),
        Arc::clone(&state.metrics),
    ));
    state.registry.register(Arc::clone(&conn));
    tracing::info!(client_id = %conn.id(), "websocket client connected");

    connection::handle_ws_connection(socket, Arc::clone(&conn), state.clone()).await;

    state.registry.unregister(conn.id());
}

// ── REST ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub clients: usize,
    pub sessions: usize,
    pub uptime_secs: u64,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.into(),
        clients: state.registry.count(),
        sessions: state.sessions.session_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Json<Vec<MetricSample>> {
    Json(state.metrics.snapshot())
}

/// GET /nodes
async fn list_nodes(State(state): State<AppState>) -> Json<Vec<VariableDescriptor>> {
    Json(state.sessions.address_space().browse())
}

/// GET /nodes/{id}
async fn read_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VariableSnapshot>, ApiError> {
    let snapshot = state.sessions.address_space().read(&id).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub node: NodeId,
    pub samples: Vec<HistorySample>,
}

/// GET /nodes/{id}/history
async fn node_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let descriptor = state.sessions.address_space().resolve(&id)?;
    Ok(Json(HistoryResponse {
        node: descriptor.id.clone(),
        samples: state.history.samples(&id),
    }))
}

#[derive(Debug, Deserialize)]
struct WriteBody {
    value: Value,
}

/// POST /nodes/{id}
///
/// Runs the same security and session path as a socket write, under a
/// session that lives only for this request.
async fn write_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<WriteBody>, JsonRejection>,
) -> Result<Json<VariableSnapshot>, ApiError> {
    let secret = bearer_token(&headers)
        .ok_or_else(|| BridgeError::Unauthenticated("missing bearer token".into()))?;
    let Json(body) = body.map_err(|e| BridgeError::ProtocolError(e.body_text()))?;

    let sessions = &state.sessions;
    let token = sessions
        .security()
        .authenticate(&Credentials::token(secret))
        .await?;
    let session = sessions.create_session(token, None)?;

    let node = NodeId::from(id);
    let started = Instant::now();
    let result = sessions.request_write(&session, &node, body.value).await;
    state.metrics.histogram_observe(
        "gateway.write_ms",
        &[],
        started.elapsed().as_secs_f64() * 1000.0,
    );
    sessions.close_session(&session, CloseReason::Explicit);
    result?;

    let snapshot = sessions.address_space().read(node.as_str()).await?;
    Ok(Json(snapshot))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
