use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::json_body;
use crate::auth::authenticate;
use crate::error::ServiceError;
use crate::models::{
    HistoryDeleteParams, HistoryParams, HistoryResponse, PendingTasksResponse, SuccessResponse,
    TaskLogRequest,
};
use crate::service::tasks;
use crate::state::AppState;

pub async fn log_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TaskLogRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    tasks::log_task(&state, &user, payload).await.map(Json)
}

pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    tasks::history(&state, &user, params).await.map(Json)
}

pub async fn delete_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryDeleteParams>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    tasks::delete_history(&state, &user, params).await.map(Json)
}

pub async fn pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PendingTasksResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    tasks::pending(&state, &user).await.map(Json)
}

/// Failures answer with the auth status and `valid: false`.
pub async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authenticate(&state, &headers).await {
        Ok(user) => Json(tasks::verify(&user)).into_response(),
        Err(err) => (
            err.status,
            Json(json!({ "valid": false, "error": err.body.error, "code": err.body.code })),
        )
            .into_response(),
    }
}
