use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    Json,
};

use super::json_body;
use crate::auth::authenticate;
use crate::error::ServiceError;
use crate::models::{AddFavoriteRequest, FavoriteParams, FavoritesResponse, SuccessResponse};
use crate::service::favorites;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FavoritesResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    favorites::list(&state, &user).await.map(Json)
}

pub async fn add(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AddFavoriteRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    favorites::add(&state, &user, payload).await.map(Json)
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FavoriteParams>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    favorites::remove(&state, &user, params).await.map(Json)
}
