use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;

use super::json_body;
use crate::auth::require_admin;
use crate::error::ServiceError;
use crate::models::{
    AdminStatsResponse, AdminTaskParams, AdminTasksResponse, AdminUsersResponse, BanRequest,
    EmailParams, SuccessResponse,
};
use crate::service::admin;
use crate::state::AppState;

pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AdminTaskParams>,
) -> Result<Json<AdminTasksResponse>, ServiceError> {
    require_admin(&state, &headers).await?;
    admin::list_tasks(&state, params).await.map(Json)
}

pub async fn users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminUsersResponse>, ServiceError> {
    require_admin(&state, &headers).await?;
    admin::users(&state).await.map(Json)
}

pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminStatsResponse>, ServiceError> {
    require_admin(&state, &headers).await?;
    admin::stats(&state, Utc::now()).await.map(Json)
}

pub async fn ban(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BanRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let caller = require_admin(&state, &headers).await?;
    let payload = json_body(payload)?;
    admin::ban(&state, &caller, payload).await.map(Json)
}

pub async fn unban(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<EmailParams>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let caller = require_admin(&state, &headers).await?;
    admin::unban(&state, &caller, params).await.map(Json)
}
