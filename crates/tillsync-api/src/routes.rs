use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tillsync_core::models::{ResolutionStrategy, SessionId, SyncSession, TriggerKind};
use tillsync_core::db::QueueStats;
use tillsync_core::{OfflineQueueService, OperationKind, OperationPayload, QueueId, QueueItem};

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: OfflineQueueService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, service: OfflineQueueService) -> Self {
        Self { config, service }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        // Static segments win over the parameterized queue routes below
        .route("/offline/queue/pending", get(list_pending))
        .route("/offline/queue/stats", get(queue_stats))
        .route("/offline/queue/clear-synced", delete(clear_synced))
        .route("/offline/queue/{key}", post(enqueue).get(get_item))
        .route("/offline/queue/{key}/retry", post(retry_item))
        .route("/offline/sync", post(trigger_sync))
        .route("/offline/conflicts", get(list_conflicts))
        .route("/offline/conflicts/{key}/resolve", post(resolve_conflict))
        .route("/offline/sessions", get(list_sessions))
        .route("/offline/sessions/{key}", get(get_session))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

#[derive(Debug, Deserialize)]
struct EnqueueBody {
    device_id: String,
    /// The operation's business content; the route's kind tag is folded in
    payload: serde_json::Value,
    /// When the operation occurred on the device (Unix ms); defaults to now
    offline_timestamp: Option<i64>,
    actor: Option<String>,
    priority: Option<i32>,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    queue_id: String,
    status: String,
    priority: i32,
    content_checksum: String,
}

async fn enqueue(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<EnqueueResponse>, AppError> {
    let kind: OperationKind = kind
        .parse()
        .map_err(|_| AppError::bad_request(format!("unrecognized operation kind: {kind}")))?;

    let mut payload = body.payload;
    let serde_json::Value::Object(ref mut fields) = payload else {
        return Err(AppError::bad_request("payload must be a JSON object"));
    };
    fields.insert(
        "kind".to_string(),
        serde_json::Value::String(kind.as_str().to_string()),
    );
    let payload: OperationPayload = serde_json::from_value(payload)
        .map_err(|error| AppError::bad_request(format!("malformed {kind} payload: {error}")))?;

    let offline_timestamp = body
        .offline_timestamp
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let actor = body.actor.unwrap_or_else(|| "unknown".to_string());

    let item = state
        .service
        .enqueue(body.device_id, payload, offline_timestamp, actor, body.priority)
        .await?;

    Ok(Json(EnqueueResponse {
        queue_id: item.id.as_str(),
        status: item.status.to_string(),
        priority: item.priority,
        content_checksum: item.content_checksum,
    }))
}

#[derive(Debug, Deserialize)]
struct InspectQuery {
    device_id: Option<String>,
    limit: Option<usize>,
}

async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<Vec<QueueItem>>, AppError> {
    let items = state
        .service
        .list_pending(query.device_id.as_deref(), query.limit.unwrap_or(100))
        .await?;
    Ok(Json(items))
}

async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<Vec<QueueItem>>, AppError> {
    let items = state
        .service
        .list_conflicts(query.device_id.as_deref(), query.limit.unwrap_or(100))
        .await?;
    Ok(Json(items))
}

async fn queue_stats(
    State(state): State<AppState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<QueueStats>, AppError> {
    let stats = state.service.stats(query.device_id.as_deref()).await?;
    Ok(Json(stats))
}

async fn get_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<QueueItem>, AppError> {
    let id = parse_queue_id(&key)?;
    let item = state
        .service
        .get_item(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("queue item {key}")))?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
struct SyncBody {
    device_id: String,
    trigger: Option<String>,
    batch_limit: Option<usize>,
}

async fn trigger_sync(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<SyncSession>, AppError> {
    let trigger = match body.trigger.as_deref() {
        None => TriggerKind::Manual,
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::bad_request(format!("unknown trigger kind: {raw}")))?,
    };
    let batch_limit = body.batch_limit.or(Some(state.config.batch_limit));

    let session = state
        .service
        .run_sync(body.device_id, trigger, batch_limit)
        .await?;

    tracing::info!(
        session_id = %session.id,
        status = session.status.as_str(),
        processed = session.counts.processed,
        "Sync session triggered over HTTP"
    );
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    strategy: String,
    actor: Option<String>,
    reason: Option<String>,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<QueueItem>, AppError> {
    let id = parse_queue_id(&key)?;
    let strategy: ResolutionStrategy = body
        .strategy
        .parse()
        .map_err(|_| AppError::bad_request(format!("unknown resolution strategy: {}", body.strategy)))?;

    let item = state
        .service
        .resolve_conflict(
            &id,
            strategy,
            body.actor.as_deref().unwrap_or("unknown"),
            body.reason.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(Json(item))
}

async fn retry_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<QueueItem>, AppError> {
    let id = parse_queue_id(&key)?;
    let item = state.service.retry_item(&id).await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
struct PurgeQuery {
    older_than_days: Option<u32>,
    device_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PurgeResponse {
    deleted: u64,
    older_than_days: u32,
}

async fn clear_synced(
    State(state): State<AppState>,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<PurgeResponse>, AppError> {
    let older_than_days = query.older_than_days.unwrap_or(state.config.retention_days);
    let deleted = state
        .service
        .purge_synced(older_than_days, query.device_id.as_deref())
        .await?;
    Ok(Json(PurgeResponse {
        deleted,
        older_than_days,
    }))
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<Vec<SyncSession>>, AppError> {
    let sessions = state
        .service
        .list_sessions(query.device_id.as_deref(), query.limit.unwrap_or(20))
        .await?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SyncSession>, AppError> {
    let id: SessionId = key
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid session id: {key}")))?;
    let session = state
        .service
        .get_session(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("sync session {key}")))?;
    Ok(Json(session))
}

fn parse_queue_id(key: &str) -> Result<QueueId, AppError> {
    key.parse()
        .map_err(|_| AppError::bad_request(format!("invalid queue id: {key}")))
}
