//! Outfits hang off a character and are scoped to the caller the same way.

use chrono::Utc;
use uuid::Uuid;

use super::characters::{blob_store, owned_character, upload};
use super::{parse_id, required};
use crate::auth::Identity;
use crate::error::{store_failure, ServiceError};
use crate::models::{
    FormData, NewOutfit, Outfit, OutfitResponse, OutfitUpdate, OutfitsResponse, SuccessResponse,
    UpdateOutfitRequest,
};
use crate::state::AppState;

const DEFAULT_OUTFIT_TYPE: &str = "general";

/// Anything outside `[A-Za-z0-9.-]` becomes `_`.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn outfit_key(user_id: Uuid, character_id: Uuid, file_name: &str) -> String {
    format!(
        "outfits/{user_id}/{character_id}/{}-{}",
        Utc::now().timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

fn trimmed_or_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

async fn owned_outfit(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    outfit_id: &str,
) -> Result<Outfit, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let id = parse_id(outfit_id, "outfit")?;
    state
        .store
        .find_outfit(id, character.id, user.id)
        .await
        .map_err(store_failure("find outfit"))?
        .ok_or_else(|| ServiceError::not_found("outfit not found"))
}

pub async fn list(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<OutfitsResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let outfits = state
        .store
        .list_outfits(character.id, user.id)
        .await
        .map_err(store_failure("list outfits"))?;
    Ok(OutfitsResponse { outfits })
}

/// Multipart create: `outfit_name` and `outfit_image` are required. The
/// uploaded image is removed again if the row cannot be written.
pub async fn create(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    mut form: FormData,
) -> Result<OutfitResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let outfit_name = required(form.text("outfit_name"), "outfit_name is required")?.to_string();
    let image = form
        .take_file("outfit_image")
        .ok_or_else(|| ServiceError::validation("outfit_image is required"))?;
    let outfit_type = form
        .text("outfit_type")
        .unwrap_or(DEFAULT_OUTFIT_TYPE)
        .to_string();
    let description = trimmed_or_none(form.text("description"));
    let blobs = blob_store(state)?;

    let key = outfit_key(user.id, character.id, &image.file_name);
    let size = image.bytes.len();
    let image_url = upload(blobs.as_ref(), &key, image).await.map_err(|err| {
        tracing::error!(error = %err, key = %key, "outfit image upload failed");
        ServiceError::internal("outfit image upload failed")
    })?;
    tracing::debug!(key = %key, size, "outfit image uploaded");

    let inserted = state
        .store
        .insert_outfit(&NewOutfit {
            character_id: character.id,
            user_id: user.id,
            outfit_name,
            outfit_image_url: Some(image_url),
            outfit_type,
            description,
        })
        .await;
    let outfit = match inserted {
        Ok(outfit) => outfit,
        Err(err) => {
            if let Err(cleanup) = blobs.delete_object(&key).await {
                tracing::warn!(error = %cleanup, key = %key, "orphaned outfit image not removed");
            }
            return Err(store_failure("create outfit")(err));
        }
    };
    tracing::info!(outfit_id = %outfit.id, character_id = %character.id, "outfit created");
    Ok(OutfitResponse { outfit })
}

pub async fn get(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    outfit_id: &str,
) -> Result<OutfitResponse, ServiceError> {
    let outfit = owned_outfit(state, user, character_id, outfit_id).await?;
    Ok(OutfitResponse { outfit })
}

/// Partial update. A present but blank `description` clears it.
pub async fn update(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    outfit_id: &str,
    request: UpdateOutfitRequest,
) -> Result<OutfitResponse, ServiceError> {
    let outfit = owned_outfit(state, user, character_id, outfit_id).await?;

    let outfit_name = match request.outfit_name.as_deref() {
        Some(name) => Some(required(Some(name), "outfit_name cannot be empty")?.to_string()),
        None => None,
    };
    let update = OutfitUpdate {
        outfit_name,
        outfit_type: request.outfit_type,
        description: request
            .description
            .map(|description| trimmed_or_none(description.as_deref())),
    };
    if update.is_empty() {
        return Err(ServiceError::validation("no fields to update"));
    }

    let outfit = state
        .store
        .update_outfit(outfit.id, &update)
        .await
        .map_err(store_failure("update outfit"))?
        .ok_or_else(|| ServiceError::not_found("outfit not found"))?;
    Ok(OutfitResponse { outfit })
}

/// Drops the image blob (failures are only logged), then the row.
pub async fn delete(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    outfit_id: &str,
) -> Result<SuccessResponse, ServiceError> {
    let outfit = owned_outfit(state, user, character_id, outfit_id).await?;

    if let (Some(blobs), Some(url)) = (state.storage.as_ref(), outfit.outfit_image_url.as_deref()) {
        if let Some(key) = blobs.key_for_url(url) {
            if let Err(err) = blobs.delete_object(&key).await {
                tracing::warn!(error = %err, key = %key, outfit_id = %outfit.id, "blob delete failed");
            }
        }
    }

    state
        .store
        .delete_outfit(outfit.id)
        .await
        .map_err(store_failure("delete outfit"))?;
    tracing::info!(outfit_id = %outfit.id, "outfit deleted");
    Ok(SuccessResponse::ok())
}
