//! Management API routes
//!
//! Exposes the engine operations under `/_fieldcache`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use fieldcache_core::{
    ClientMessage, Command, CommandReply, DrainReport, EngineStatus, NewAction, PushMessage,
};
use fieldcache_db::PendingAction;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

// ==================== Types ====================

/// Query of `DELETE /_fieldcache/cache`
#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    pub partition: Option<String>,
    pub key: Option<String>,
}

/// Query of `GET /_fieldcache/actions`
#[derive(Debug, Deserialize)]
pub struct ActionsQuery {
    pub category: Option<String>,
}

// ==================== Handlers ====================

/// GET /_fieldcache/status
async fn status(State(state): State<AppState>) -> Result<Json<EngineStatus>, ApiError> {
    Ok(Json(state.engine.status().await?))
}

/// DELETE /_fieldcache/cache?partition=&key=
async fn invalidate(
    State(state): State<AppState>,
    Query(query): Query<InvalidateQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(
        "Invalidating cache (partition: {:?}, key: {:?})",
        query.partition, query.key
    );

    let removed = state
        .engine
        .invalidate(query.partition.as_deref(), query.key.as_deref())
        .await?;

    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// POST /_fieldcache/actions
async fn enqueue_action(
    State(state): State<AppState>,
    Json(action): Json<NewAction>,
) -> Result<(StatusCode, Json<PendingAction>), ApiError> {
    let pending = state.engine.enqueue_action(action).await?;
    Ok((StatusCode::CREATED, Json(pending)))
}

/// GET /_fieldcache/actions?category=
async fn list_actions(
    State(state): State<AppState>,
    Query(query): Query<ActionsQuery>,
) -> Result<Json<Vec<PendingAction>>, ApiError> {
    Ok(Json(
        state.engine.list_actions(query.category.as_deref()).await?,
    ))
}

/// POST /_fieldcache/sync/{category}
async fn sync_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<DrainReport>>, ApiError> {
    debug!("Sync trigger for {}", category);
    drained(
        state
            .dispatcher
            .dispatch(Command::SyncTrigger { category })
            .await?,
    )
}

/// POST /_fieldcache/sync
async fn sync_all(State(state): State<AppState>) -> Result<Json<Vec<DrainReport>>, ApiError> {
    drained(state.dispatcher.dispatch(Command::ConnectivityRestored).await?)
}

/// POST /_fieldcache/messages
async fn client_message(
    State(state): State<AppState>,
    Json(message): Json<ClientMessage>,
) -> Result<Json<CommandReply>, ApiError> {
    Ok(Json(
        state
            .dispatcher
            .dispatch(Command::ClientMessage(message))
            .await?,
    ))
}

/// POST /_fieldcache/push
async fn push_message(
    State(state): State<AppState>,
    Json(message): Json<PushMessage>,
) -> Result<Json<CommandReply>, ApiError> {
    Ok(Json(
        state
            .dispatcher
            .dispatch(Command::PushMessage(message))
            .await?,
    ))
}

fn drained(reply: CommandReply) -> Result<Json<Vec<DrainReport>>, ApiError> {
    match reply {
        CommandReply::Drained(reports) => Ok(Json(reports)),
        other => Err(ApiError::Internal(format!("unexpected reply: {:?}", other))),
    }
}

/// Create management API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/_fieldcache/status", get(status))
        .route("/_fieldcache/cache", delete(invalidate))
        .route(
            "/_fieldcache/actions",
            post(enqueue_action).get(list_actions),
        )
        .route("/_fieldcache/sync", post(sync_all))
        .route("/_fieldcache/sync/{category}", post(sync_category))
        .route("/_fieldcache/messages", post(client_message))
        .route("/_fieldcache/push", post(push_message))
}
