use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Multipart, Path, Query, State,
    },
    http::HeaderMap,
    Json,
};

use super::{json_body, read_form};
use crate::auth::authenticate;
use crate::error::ServiceError;
use crate::models::{
    AddFavoriteRequest, AssetsResponse, CharacterResponse, CharactersResponse, FavoriteParams,
    FavoritesResponse, OutfitResponse, OutfitsResponse, PendingTasksResponse, ReferencesResponse,
    SuccessResponse, UpdateOutfitRequest,
};
use crate::service::{characters, outfits};
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CharactersResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::list(&state, &user).await.map(Json)
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CharacterResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    characters::create(&state, &user, form).await.map(Json)
}

pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CharacterResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::get(&state, &user, &id).await.map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::delete(&state, &user, &id).await.map(Json)
}

pub async fn assets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AssetsResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::assets(&state, &user, &id).await.map(Json)
}

pub async fn references(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ReferencesResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::references(&state, &user, &id).await.map(Json)
}

pub async fn delete_reference(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, reference_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::delete_reference(&state, &user, &id, &reference_id)
        .await
        .map(Json)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::delete_resource(&state, &user, &id, &task_id)
        .await
        .map(Json)
}

pub async fn pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PendingTasksResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::pending(&state, &user, &id).await.map(Json)
}

pub async fn favorites(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<FavoritesResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::favorites(&state, &user, &id).await.map(Json)
}

pub async fn add_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<AddFavoriteRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    characters::add_favorite(&state, &user, &id, payload)
        .await
        .map(Json)
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<FavoriteParams>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    characters::remove_favorite(&state, &user, &id, params)
        .await
        .map(Json)
}

pub async fn list_outfits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OutfitsResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    outfits::list(&state, &user, &id).await.map(Json)
}

pub async fn create_outfit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OutfitResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    outfits::create(&state, &user, &id, form).await.map(Json)
}

pub async fn get_outfit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, outfit_id)): Path<(String, String)>,
) -> Result<Json<OutfitResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    outfits::get(&state, &user, &id, &outfit_id).await.map(Json)
}

pub async fn update_outfit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, outfit_id)): Path<(String, String)>,
    payload: Result<Json<UpdateOutfitRequest>, JsonRejection>,
) -> Result<Json<OutfitResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    outfits::update(&state, &user, &id, &outfit_id, payload)
        .await
        .map(Json)
}

pub async fn delete_outfit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, outfit_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    outfits::delete(&state, &user, &id, &outfit_id)
        .await
        .map(Json)
}
