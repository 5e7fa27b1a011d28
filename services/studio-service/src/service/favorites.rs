//! Favorites made from the history view. They are keyed by the caller's email
//! and are not tied to a character.

use std::collections::HashMap;

use super::required;
use crate::auth::Identity;
use crate::error::{store_failure, ServiceError};
use crate::models::{
    AddFavoriteRequest, Asset, FavoriteParams, FavoritesResponse, GenerationTask, GlobalFavorite,
    SuccessResponse,
};
use crate::state::AppState;

/// Newest favorite first. A favorite's own `image_url` wins over the task's
/// output; favorites whose task is gone or not completed are skipped.
pub async fn list(state: &AppState, user: &Identity) -> Result<FavoritesResponse, ServiceError> {
    let favorites = state
        .store
        .global_favorites(&user.email)
        .await
        .map_err(store_failure("list global favorites"))?;
    if favorites.is_empty() {
        return Ok(FavoritesResponse {
            favorites: Vec::new(),
        });
    }

    let task_ids: Vec<String> = favorites.iter().map(|fav| fav.task_id.clone()).collect();
    let tasks = state
        .store
        .completed_tasks_by_ids(&task_ids)
        .await
        .map_err(store_failure("fetch favorite tasks"))?;
    let mut by_id: HashMap<String, GenerationTask> = HashMap::new();
    for task in tasks {
        by_id.entry(task.task_id.clone()).or_insert(task);
    }

    let favorites = favorites
        .into_iter()
        .filter_map(|favorite| {
            let task = by_id.get(&favorite.task_id)?.clone();
            let mut asset = Asset::from_task(task, true);
            if let Some(url) = favorite.image_url {
                asset.output_image_url = Some(url);
            }
            Some(asset)
        })
        .collect();
    Ok(FavoritesResponse { favorites })
}

/// Idempotent on `(email, task_id, image_url)`.
pub async fn add(
    state: &AppState,
    user: &Identity,
    request: AddFavoriteRequest,
) -> Result<SuccessResponse, ServiceError> {
    let task_id = required(request.task_id.as_deref(), "task_id is required")?.to_string();
    let favorite = GlobalFavorite {
        email: user.email.clone(),
        task_id,
        image_url: request.image_url.filter(|url| !url.is_empty()),
    };

    let exists = state
        .store
        .global_favorite_exists(&favorite)
        .await
        .map_err(store_failure("check global favorite"))?;
    if exists {
        return Ok(SuccessResponse::with_message("already in favorites"));
    }
    state
        .store
        .insert_global_favorite(&favorite)
        .await
        .map_err(store_failure("add global favorite"))?;
    Ok(SuccessResponse::ok())
}

/// Removes every favorite of this task for the caller, whatever its image.
pub async fn remove(
    state: &AppState,
    user: &Identity,
    params: FavoriteParams,
) -> Result<SuccessResponse, ServiceError> {
    let task_id = required(params.task_id.as_deref(), "task_id is required")?;
    let removed = state
        .store
        .delete_global_favorite(&user.email, task_id)
        .await
        .map_err(store_failure("remove global favorite"))?;
    tracing::debug!(task_id, removed, "global favorite removed");
    Ok(SuccessResponse::ok())
}
