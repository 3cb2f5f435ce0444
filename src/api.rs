//! HTTP/WebSocket boundary consumed by the dashboard

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::{ExchangeError, TaskError};
use crate::preview::{preview, Preview, PreviewError, PreviewRequest};
use crate::task::{TaskConfig, TaskRegistry, TaskStatus, TaskView};
use crate::task_log::LogOrder;
use crate::trade_db::{Trade, TradeStats};
use crate::types::Position;

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

const DEFAULT_LOG_LIMIT: usize = 100;
const DEFAULT_TRADE_LIMIT: u32 = 50;
const TASK_LIST_LIMIT: u32 = 200;

#[derive(Clone)]
pub struct AppState {
    pub registry: TaskRegistry,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Tasks
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/start", post(start_task))
        .route("/api/tasks/:id/stop", post(stop_task))
        .route("/api/tasks/:id/logs", get(task_logs))
        .route("/ws/logs/:id", get(log_stream))
        // Ledger
        .route("/api/trades", get(list_trades))
        .route("/api/trades/stats", get(trade_stats))
        // Exchange
        .route("/api/settings/token", post(update_token))
        .route("/api/preview", post(preview_market))
        .route("/api/positions", post(list_positions))
        .route("/api/status", get(status))
        .with_state(state)
        .layer(cors)
}

/// Serve until the listener fails; callers race this against shutdown
pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("🌐 API listening on http://{}", bind_addr);

    axum::serve(listener, create_router(state))
        .await
        .context("HTTP server failed")
}

fn task_error(e: TaskError) -> (StatusCode, String) {
    let status = match e {
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::InvalidConfig(_) | TaskError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}

fn exchange_error(e: ExchangeError) -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, e.to_string())
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    warn!("Request failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Serialize)]
pub struct TaskAck {
    pub id: String,
    pub status: TaskStatus,
}

/// POST /api/tasks
async fn create_task(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<TaskAck> {
    let config = TaskConfig::from_json(body).map_err(task_error)?;
    let task = state.registry.create(config).map_err(task_error)?;
    Ok(Json(TaskAck {
        id: task.id,
        status: task.status,
    }))
}

/// GET /api/tasks
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskView>> {
    Json(state.registry.history(TASK_LIST_LIMIT))
}

/// GET /api/tasks/:id
async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<TaskView> {
    state.registry.get(&id).map(Json).map_err(task_error)
}

/// POST /api/tasks/:id/start
async fn start_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<TaskAck> {
    let task = state.registry.start(&id).map_err(task_error)?;
    Ok(Json(TaskAck {
        id: task.id,
        status: task.status,
    }))
}

/// POST /api/tasks/:id/stop
async fn stop_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<TaskAck> {
    let task = state.registry.stop(&id).await.map_err(task_error)?;
    Ok(Json(TaskAck {
        id: task.id,
        status: task.status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: LogOrder,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub task_id: String,
    pub logs: Vec<String>,
}

/// GET /api/tasks/:id/logs?limit=&order=
async fn task_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<LogsResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let logs = state.registry.logs(&id, limit, query.order).map_err(task_error)?;
    Ok(Json(LogsResponse { task_id: id, logs }))
}

/// GET /ws/logs/:id, one text frame per new log line
async fn log_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, (StatusCode, String)> {
    let rx = state.registry.subscribe_logs(&id).map_err(task_error)?;
    Ok(ws.on_upgrade(move |socket| forward_logs(socket, rx, id)))
}

async fn forward_logs(socket: WebSocket, mut rx: tokio::sync::broadcast::Receiver<String>, id: String) {
    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    if sender.send(Message::Text(line)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    let notice = format!("... {} log lines skipped", skipped);
                    if sender.send(Message::Text(notice)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    send_task.abort();
    info!("Log stream for {} closed", id);
}

#[derive(Debug, Deserialize)]
pub struct TradeQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET /api/trades?limit=&offset=
async fn list_trades(State(state): State<AppState>, Query(query): Query<TradeQuery>) -> ApiResult<Vec<Trade>> {
    let limit = query.limit.unwrap_or(DEFAULT_TRADE_LIMIT);
    let offset = query.offset.unwrap_or(0);
    state.registry.ledger().list(limit, offset).map(Json).map_err(internal)
}

/// GET /api/trades/stats
async fn trade_stats(State(state): State<AppState>) -> ApiResult<TradeStats> {
    state.registry.ledger().stats().map(Json).map_err(internal)
}

#[derive(Debug, Deserialize)]
pub struct TokenUpdate {
    pub auth_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenAck {
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// POST /api/settings/token
async fn update_token(State(state): State<AppState>, Json(body): Json<TokenUpdate>) -> ApiResult<TokenAck> {
    let token = body.auth_token.trim();
    if token.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "auth_token is required".to_string()));
    }
    let credential = state.registry.tokens().set(token);
    Ok(Json(TokenAck {
        issued_at: credential.issued_at,
        expires_at: credential.expires_at(),
    }))
}

/// POST /api/preview
async fn preview_market(State(state): State<AppState>, Json(request): Json<PreviewRequest>) -> ApiResult<Preview> {
    let exchange = state.registry.exchange();
    let tick = state.registry.settings().tick;
    let timeout = state.registry.settings().request_timeout;

    match tokio::time::timeout(timeout, preview(exchange.as_ref(), &request, tick)).await {
        Ok(Ok(preview)) => Ok(Json(preview)),
        Ok(Err(PreviewError::Invalid(msg))) => Err((StatusCode::BAD_REQUEST, msg)),
        Ok(Err(PreviewError::Exchange(e))) => Err(exchange_error(e)),
        Err(_) => Err(exchange_error(ExchangeError::Timeout)),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PositionsRequest {
    pub topic_id: Option<u64>,
}

/// POST /api/positions
async fn list_positions(
    State(state): State<AppState>,
    Json(body): Json<PositionsRequest>,
) -> ApiResult<Vec<Position>> {
    let credential = match state.registry.tokens().snapshot() {
        Some(c) if !c.is_expired() => c,
        _ => return Err((StatusCode::UNAUTHORIZED, "auth token not set or expired".to_string())),
    };
    let exchange = state.registry.exchange();
    let timeout = state.registry.settings().request_timeout;

    match tokio::time::timeout(timeout, exchange.get_positions(body.topic_id, &credential)).await {
        Ok(Ok(positions)) => Ok(Json(positions)),
        Ok(Err(e)) => Err(exchange_error(e)),
        Err(_) => Err(exchange_error(ExchangeError::Timeout)),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running_tasks: usize,
    pub total_trades: u32,
    pub total_profit: Decimal,
    pub dry_run: bool,
    pub token_expired: bool,
}

/// GET /api/status
async fn status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let stats = state.registry.ledger().stats().map_err(internal)?;
    Ok(Json(StatusResponse {
        running_tasks: state.registry.running_count(),
        total_trades: stats.total_trades,
        total_profit: stats.total_profit,
        dry_run: state.registry.settings().dry_run,
        token_expired: state.registry.tokens().is_expired(),
    }))
}
