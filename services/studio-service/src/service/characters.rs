//! Character galleries. Every call re-checks that the character belongs to
//! the caller; a foreign id answers exactly like a missing one.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::{parse_id, required};
use crate::auth::Identity;
use crate::error::{store_failure, ServiceError};
use crate::models::{
    AddFavoriteRequest, Asset, AssetsResponse, Character, CharacterResponse, CharactersResponse,
    FavoriteParams, FavoritesResponse, FormData, FormFile, NewCharacter, NewFavorite,
    PendingTasksResponse, ReferencesResponse, SuccessResponse,
};
use crate::state::AppState;
use crate::storage::BlobStore;

const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

pub(super) async fn owned_character(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<Character, ServiceError> {
    let id = parse_id(character_id, "character")?;
    state
        .store
        .find_character(id, user.id)
        .await
        .map_err(store_failure("find character"))?
        .ok_or_else(|| ServiceError::not_found("character not found"))
}

pub(super) fn blob_store(state: &AppState) -> Result<&Arc<dyn BlobStore>, ServiceError> {
    state
        .storage
        .as_ref()
        .ok_or_else(|| ServiceError::internal("object storage is not configured"))
}

fn object_key(user_id: Uuid, kind: &str, file: &FormFile) -> String {
    format!(
        "characters/{user_id}/{}-{kind}-{}",
        Utc::now().timestamp_millis(),
        file.file_name
    )
}

pub(super) async fn upload(blobs: &dyn BlobStore, key: &str, file: FormFile) -> Result<String, String> {
    let content_type = if file.content_type.is_empty() {
        DEFAULT_IMAGE_TYPE.to_string()
    } else {
        file.content_type
    };
    blobs.put_object(key, file.bytes, &content_type).await
}

pub async fn list(state: &AppState, user: &Identity) -> Result<CharactersResponse, ServiceError> {
    let characters = state
        .store
        .list_characters(user.id)
        .await
        .map_err(store_failure("list characters"))?;
    Ok(CharactersResponse { characters })
}

/// Creates a character from a multipart form. `char_name` and `char_avatar`
/// are required; a failed `char_image` upload leaves the image unset.
pub async fn create(
    state: &AppState,
    user: &Identity,
    mut form: FormData,
) -> Result<CharacterResponse, ServiceError> {
    let char_name = required(form.text("char_name"), "char_name is required")?.to_string();
    let avatar = form
        .take_file("char_avatar")
        .ok_or_else(|| ServiceError::validation("char_avatar is required"))?;
    let blobs = blob_store(state)?;

    let avatar_key = object_key(user.id, "avatar", &avatar);
    let char_avatar = upload(blobs.as_ref(), &avatar_key, avatar)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, key = %avatar_key, "avatar upload failed");
            ServiceError::internal("avatar upload failed")
        })?;

    let mut char_image = None;
    if let Some(image) = form.take_file("char_image") {
        let image_key = object_key(user.id, "image", &image);
        match upload(blobs.as_ref(), &image_key, image).await {
            Ok(url) => char_image = Some(url),
            Err(err) => tracing::warn!(error = %err, key = %image_key, "character image upload failed"),
        }
    }

    let character = state
        .store
        .insert_character(&NewCharacter {
            user_id: user.id,
            char_name,
            char_avatar: Some(char_avatar),
            char_image,
        })
        .await
        .map_err(store_failure("create character"))?;
    tracing::info!(character_id = %character.id, user_id = %user.id, "character created");
    Ok(CharacterResponse { character })
}

pub async fn get(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<CharacterResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    Ok(CharacterResponse { character })
}

/// Removes the avatar and image blobs (failures are only logged), then the row.
pub async fn delete(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<SuccessResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;

    if let Some(blobs) = state.storage.as_ref() {
        let urls = [character.char_avatar.as_deref(), character.char_image.as_deref()];
        for key in urls.into_iter().flatten().filter_map(|url| blobs.key_for_url(url)) {
            if let Err(err) = blobs.delete_object(&key).await {
                tracing::warn!(error = %err, key = %key, character_id = %character.id, "blob delete failed");
            }
        }
    }

    state
        .store
        .delete_character(character.id, user.id)
        .await
        .map_err(store_failure("delete character"))?;
    tracing::info!(character_id = %character.id, user_id = %user.id, "character deleted");
    Ok(SuccessResponse::ok())
}

/// Completed tasks generated for the character, flagged when favorited.
pub async fn assets(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<AssetsResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let tasks = state
        .store
        .completed_character_tasks(character.id)
        .await
        .map_err(store_failure("list character assets"))?;
    let favorites: HashSet<String> = state
        .store
        .favorite_task_ids(character.id, user.id)
        .await
        .map_err(store_failure("list favorites"))?
        .into_iter()
        .collect();

    let assets = tasks
        .into_iter()
        .map(|task| {
            let is_favorite = favorites.contains(&task.task_id);
            Asset::from_task(task, is_favorite)
        })
        .collect();
    Ok(AssetsResponse { assets })
}

pub async fn references(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<ReferencesResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let references = state
        .store
        .list_references(character.id)
        .await
        .map_err(store_failure("list references"))?;
    Ok(ReferencesResponse { references })
}

pub async fn delete_reference(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    reference_id: &str,
) -> Result<SuccessResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let reference_id = parse_id(reference_id, "reference")?;
    state
        .store
        .delete_reference(character.id, reference_id)
        .await
        .map_err(store_failure("delete reference"))?;
    Ok(SuccessResponse::ok())
}

/// Deletes the one task row with this `task_id` under this character.
/// Rows sharing the `task_id` under other characters stay.
pub async fn delete_resource(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    task_id: &str,
) -> Result<SuccessResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    state
        .store
        .find_character_task(character.id, task_id)
        .await
        .map_err(store_failure("find resource"))?
        .ok_or_else(|| ServiceError::not_found("resource not found"))?;
    let removed = state
        .store
        .delete_character_task(character.id, task_id)
        .await
        .map_err(store_failure("delete resource"))?;
    tracing::info!(character_id = %character.id, task_id, removed, "character resource deleted");
    Ok(SuccessResponse::ok())
}

pub async fn pending(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<PendingTasksResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let tasks = state
        .store
        .in_flight_tasks(&user.email, Some(character.id))
        .await
        .map_err(store_failure("fetch character pending tasks"))?;
    Ok(PendingTasksResponse {
        count: tasks.len(),
        pending_tasks: tasks,
    })
}

pub async fn favorites(
    state: &AppState,
    user: &Identity,
    character_id: &str,
) -> Result<FavoritesResponse, ServiceError> {
    let character = owned_character(state, user, character_id).await?;
    let task_ids = state
        .store
        .favorite_task_ids(character.id, user.id)
        .await
        .map_err(store_failure("list favorites"))?;
    if task_ids.is_empty() {
        return Ok(FavoritesResponse {
            favorites: Vec::new(),
        });
    }
    let tasks = state
        .store
        .completed_tasks_by_ids(&task_ids)
        .await
        .map_err(store_failure("fetch favorite tasks"))?;
    Ok(FavoritesResponse {
        favorites: tasks
            .into_iter()
            .map(|task| Asset::from_task(task, true))
            .collect(),
    })
}

/// Idempotent on `(character, user, task_id, image_url)`.
pub async fn add_favorite(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    request: AddFavoriteRequest,
) -> Result<SuccessResponse, ServiceError> {
    let task_id = required(request.task_id.as_deref(), "task_id is required")?.to_string();
    let character = owned_character(state, user, character_id).await?;
    let favorite = NewFavorite {
        character_id: character.id,
        user_id: user.id,
        task_id,
        image_url: request.image_url.filter(|url| !url.is_empty()),
    };

    let exists = state
        .store
        .favorite_exists(&favorite)
        .await
        .map_err(store_failure("check favorite"))?;
    if exists {
        return Ok(SuccessResponse::with_message("already in favorites"));
    }
    state
        .store
        .insert_favorite(&favorite)
        .await
        .map_err(store_failure("add favorite"))?;
    Ok(SuccessResponse::ok())
}

pub async fn remove_favorite(
    state: &AppState,
    user: &Identity,
    character_id: &str,
    params: FavoriteParams,
) -> Result<SuccessResponse, ServiceError> {
    let task_id = required(params.task_id.as_deref(), "task_id is required")?;
    let character = owned_character(state, user, character_id).await?;
    state
        .store
        .delete_favorite(character.id, user.id, task_id)
        .await
        .map_err(store_failure("remove favorite"))?;
    Ok(SuccessResponse::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CharacterReference;
    use crate::store::Store;
    use crate::testing::{
        base_time, harness, harness_with, other, task, user, Harness, RecordingBlobStore,
        USER_EMAIL, USER_ID,
    };
    use axum::http::StatusCode;

    const AVATAR_URL: &str = "https://blobs.test/character-assets/characters/u/1-avatar-a.png";
    const IMAGE_URL: &str = "https://blobs.test/character-assets/characters/u/1-image-b.png";

    async fn seed_character(h: &Harness) -> Character {
        let character = Character {
            id: Uuid::new_v4(),
            user_id: USER_ID,
            char_name: "Mira".to_string(),
            char_avatar: Some(AVATAR_URL.to_string()),
            char_image: Some(IMAGE_URL.to_string()),
            created_at: base_time(),
        };
        h.store.seed_character(character.clone()).await;
        character
    }

    async fn seed_character_task(h: &Harness, task_id: &str, character_id: Uuid, minutes: i64) {
        let mut row = task(task_id, USER_EMAIL, minutes);
        row.character_id = Some(character_id);
        h.store.seed_task(row).await;
    }

    fn file(name: &str) -> FormFile {
        FormFile {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    fn form(name: Option<&str>, avatar: bool, image: bool) -> FormData {
        let mut form = FormData::default();
        if let Some(name) = name {
            form.fields.insert("char_name".to_string(), name.to_string());
        }
        if avatar {
            form.files.insert("char_avatar".to_string(), file("face.png"));
        }
        if image {
            form.files.insert("char_image".to_string(), file("full.png"));
        }
        form
    }

    #[tokio::test]
    async fn foreign_and_malformed_ids_read_as_not_found() {
        let h = harness();
        let character = seed_character(&h).await;
        let id = character.id.to_string();

        let err = get(&h.state, &other(), &id).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = get(&h.state, &user(), "not-a-uuid").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(get(&h.state, &user(), &id).await.unwrap().character, character);
    }

    #[tokio::test]
    async fn create_requires_name_and_avatar() {
        let h = harness();
        let err = create(&h.state, &user(), form(Some("  "), true, false)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = create(&h.state, &user(), form(Some("Mira"), false, true)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(h.blobs.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_uploads_under_user_prefix() {
        let h = harness();
        let response = create(&h.state, &user(), form(Some(" Mira "), true, true))
            .await
            .unwrap();
        let character = response.character;
        assert_eq!(character.char_name, "Mira");
        assert_eq!(character.user_id, USER_ID);

        let puts = h.blobs.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 2);
        let prefix = format!("characters/{USER_ID}/");
        assert!(puts[0].starts_with(&prefix) && puts[0].ends_with("-avatar-face.png"));
        assert!(puts[1].ends_with("-image-full.png"));
        assert!(character.char_avatar.unwrap().ends_with(&puts[0]));
    }

    #[tokio::test]
    async fn failed_optional_image_upload_is_tolerated() {
        let blobs = RecordingBlobStore {
            fail_puts_matching: Some("-image-"),
            ..RecordingBlobStore::default()
        };
        let h = harness_with(blobs, "http://127.0.0.1:9");
        let response = create(&h.state, &user(), form(Some("Mira"), true, true))
            .await
            .unwrap();
        assert!(response.character.char_avatar.is_some());
        assert_eq!(response.character.char_image, None);
    }

    #[tokio::test]
    async fn delete_survives_blob_failures() {
        let h = harness_with(RecordingBlobStore::failing_deletes(), "http://127.0.0.1:9");
        let character = seed_character(&h).await;
        delete(&h.state, &user(), &character.id.to_string()).await.unwrap();

        let deletes = h.blobs.deletes.lock().unwrap().clone();
        assert_eq!(
            deletes,
            vec![
                "characters/u/1-avatar-a.png".to_string(),
                "characters/u/1-image-b.png".to_string()
            ]
        );
        let left = h.store.list_characters(USER_ID).await.unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn assets_are_completed_and_flag_favorites() {
        let h = harness();
        let character = seed_character(&h).await;
        let id = character.id.to_string();
        seed_character_task(&h, "older", character.id, 1).await;
        seed_character_task(&h, "newer", character.id, 5).await;
        let mut running = task("running", USER_EMAIL, 9);
        running.character_id = Some(character.id);
        running.status = Some("processing".to_string());
        h.store.seed_task(running).await;

        let request = AddFavoriteRequest {
            task_id: Some("older".to_string()),
            image_url: None,
        };
        add_favorite(&h.state, &user(), &id, request).await.unwrap();

        let assets = assets(&h.state, &user(), &id).await.unwrap().assets;
        let flags: Vec<(&str, bool)> = assets
            .iter()
            .map(|asset| (asset.task_id.as_str(), asset.is_favorite))
            .collect();
        assert_eq!(flags, vec![("newer", false), ("older", true)]);
    }

    #[tokio::test]
    async fn favorites_add_is_idempotent_and_remove_clears() {
        let h = harness();
        let character = seed_character(&h).await;
        let id = character.id.to_string();
        seed_character_task(&h, "t1", character.id, 1).await;

        let request = || AddFavoriteRequest {
            task_id: Some("t1".to_string()),
            image_url: Some("https://img/1".to_string()),
        };
        assert!(add_favorite(&h.state, &user(), &id, request()).await.unwrap().message.is_none());
        let again = add_favorite(&h.state, &user(), &id, request()).await.unwrap();
        assert!(again.message.is_some());

        let listed = favorites(&h.state, &user(), &id).await.unwrap().favorites;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_favorite);

        let params = FavoriteParams {
            task_id: Some("t1".to_string()),
        };
        remove_favorite(&h.state, &user(), &id, params).await.unwrap();
        assert!(favorites(&h.state, &user(), &id).await.unwrap().favorites.is_empty());
    }

    #[tokio::test]
    async fn favorite_on_foreign_character_is_not_found() {
        let h = harness();
        let character = seed_character(&h).await;
        let request = AddFavoriteRequest {
            task_id: Some("t1".to_string()),
            image_url: None,
        };
        let err = add_favorite(&h.state, &other(), &character.id.to_string(), request)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn favorite_remove_needs_an_owned_character() {
        let h = harness();
        let character = seed_character(&h).await;
        let id = character.id.to_string();
        seed_character_task(&h, "t1", character.id, 1).await;
        let request = AddFavoriteRequest {
            task_id: Some("t1".to_string()),
            image_url: None,
        };
        add_favorite(&h.state, &user(), &id, request).await.unwrap();

        let params = || FavoriteParams {
            task_id: Some("t1".to_string()),
        };
        let err = remove_favorite(&h.state, &other(), &id, params()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let unknown = Uuid::new_v4().to_string();
        let err = remove_favorite(&h.state, &user(), &unknown, params()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        assert_eq!(favorites(&h.state, &user(), &id).await.unwrap().favorites.len(), 1);
    }

    #[tokio::test]
    async fn resource_delete_is_scoped_to_the_character() {
        let h = harness();
        let character = seed_character(&h).await;
        let sibling = Uuid::new_v4();
        seed_character_task(&h, "shared", character.id, 1).await;
        seed_character_task(&h, "shared", sibling, 2).await;
        seed_character_task(&h, "keep", character.id, 3).await;
        let id = character.id.to_string();

        let err = delete_resource(&h.state, &other(), &id, "shared").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(h.store.all_tasks().await.len(), 3);

        let err = delete_resource(&h.state, &user(), &id, "missing").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        delete_resource(&h.state, &user(), &id, "shared").await.unwrap();
        let left: Vec<(String, Option<Uuid>)> = h
            .store
            .all_tasks()
            .await
            .into_iter()
            .map(|task| (task.task_id, task.character_id))
            .collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&("shared".to_string(), Some(sibling))));
        assert!(left.contains(&("keep".to_string(), Some(character.id))));
    }

    #[tokio::test]
    async fn references_list_and_delete_through_owner() {
        let h = harness();
        let character = seed_character(&h).await;
        let reference = CharacterReference {
            id: Uuid::new_v4(),
            character_id: character.id,
            image_url: Some("https://img/ref".to_string()),
            created_at: base_time(),
        };
        h.store.seed_reference(reference.clone()).await;
        let id = character.id.to_string();

        let listed = references(&h.state, &user(), &id).await.unwrap().references;
        assert_eq!(listed, vec![reference.clone()]);
        let err = references(&h.state, &other(), &id).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        delete_reference(&h.state, &user(), &id, &reference.id.to_string())
            .await
            .unwrap();
        assert!(references(&h.state, &user(), &id).await.unwrap().references.is_empty());
    }

    #[tokio::test]
    async fn character_pending_is_scoped() {
        let h = harness();
        let character = seed_character(&h).await;
        let mut mine = task("mine", USER_EMAIL, 1);
        mine.character_id = Some(character.id);
        mine.status = Some("pending".to_string());
        let mut elsewhere = task("elsewhere", USER_EMAIL, 2);
        elsewhere.status = Some("pending".to_string());
        h.store.seed_task(mine).await;
        h.store.seed_task(elsewhere).await;

        let response = pending(&h.state, &user(), &character.id.to_string()).await.unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(response.pending_tasks[0].task_id, "mine");
    }
}
