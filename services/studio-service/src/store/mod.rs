//! Persistence seam for generation tasks, characters and bans.
//!
//! Every method is a single read or write against the backing store; there is
//! no cross-call transaction. Errors are the store's own message with context.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ActivityRow, BannedUser, Character, CharacterReference, GenerationTask, GlobalFavorite,
    NewCharacter, NewFavorite, NewOutfit, NewTask, Outfit, OutfitUpdate,
};

pub const MAX_PAGE_LIMIT: i64 = 500;
pub const DEFAULT_ADMIN_LIMIT: i64 = 100;
pub const DEFAULT_HISTORY_PAGE_SIZE: i64 = 20;

pub type StoreResult<T> = Result<T, String>;

/// Parses a raw `limit` the way the listing endpoints accept it: anything
/// unparsable falls back to `default`, and the result is clamped to [1, 500].
pub fn clamp_limit(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
        .clamp(1, MAX_PAGE_LIMIT)
}

/// Offsets are never negative.
pub fn clamp_offset(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0)
}

/// Filters shared by the history and admin task listings.
///
/// `emails` and `usernames` each hold one or more needles; a row matches a
/// group when any needle is a case-insensitive substring. Groups combine with AND.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub owner_email: Option<String>,
    pub task_type: Option<String>,
    pub task_id: Option<String>,
    pub emails: Vec<String>,
    pub usernames: Vec<String>,
    pub prompt: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &GenerationTask) -> bool {
        if let Some(owner) = self.owner_email.as_deref() {
            if task.email.as_deref() != Some(owner) {
                return false;
            }
        }
        if let Some(task_type) = self.task_type.as_deref() {
            if task.task_type != task_type {
                return false;
            }
        }
        if let Some(needle) = self.task_id.as_deref() {
            if !contains_ignore_case(Some(&task.task_id), needle) {
                return false;
            }
        }
        if let Some(needle) = self.prompt.as_deref() {
            if !contains_ignore_case(task.prompt.as_deref(), needle) {
                return false;
            }
        }
        any_needle_matches(&self.emails, task.email.as_deref())
            && any_needle_matches(&self.usernames, task.username.as_deref())
    }
}

fn any_needle_matches(needles: &[String], value: Option<&str>) -> bool {
    needles.is_empty()
        || needles
            .iter()
            .any(|needle| contains_ignore_case(value, needle))
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|value| value.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrder {
    CreatedAtDesc,
    TaskTimeDesc,
}

#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub filter: TaskFilter,
    pub order: TaskOrder,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPage {
    pub tasks: Vec<GenerationTask>,
    pub total: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // generation_tasks
    async fn insert_task(&self, task: &NewTask) -> StoreResult<()>;
    async fn list_tasks(&self, query: &TaskQuery) -> StoreResult<TaskPage>;
    /// One batch of rows with a non-null email, newest `created_at` first.
    async fn activity_batch(&self, offset: i64, limit: i64) -> StoreResult<Vec<ActivityRow>>;
    /// Rows in `pending|processing|failed` for `email`, newest `started_at` first.
    async fn in_flight_tasks(
        &self,
        email: &str,
        character_id: Option<Uuid>,
    ) -> StoreResult<Vec<GenerationTask>>;
    /// Any row with this `task_id`; duplicates are allowed, so this is the first match.
    async fn find_task(&self, task_id: &str) -> StoreResult<Option<GenerationTask>>;
    /// Removes the rows with this `task_id` whose email is `email`.
    async fn delete_owned_tasks(&self, task_id: &str, email: &str) -> StoreResult<u64>;
    async fn completed_character_tasks(&self, character_id: Uuid)
        -> StoreResult<Vec<GenerationTask>>;
    async fn completed_tasks_by_ids(&self, task_ids: &[String]) -> StoreResult<Vec<GenerationTask>>;
    async fn find_character_task(
        &self,
        character_id: Uuid,
        task_id: &str,
    ) -> StoreResult<Option<GenerationTask>>;
    async fn delete_character_task(&self, character_id: Uuid, task_id: &str) -> StoreResult<u64>;
    /// Rows with `from <= created_at < until`; open bounds are unbounded.
    async fn count_tasks(
        &self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<i64>;
    async fn task_type_counts(&self) -> StoreResult<Vec<(String, i64)>>;
    async fn count_active_emails(&self) -> StoreResult<i64>;

    // characters
    async fn list_characters(&self, user_id: Uuid) -> StoreResult<Vec<Character>>;
    async fn insert_character(&self, character: &NewCharacter) -> StoreResult<Character>;
    async fn find_character(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Character>>;
    /// Also drops the character's references, favorites and outfits.
    /// Generation tasks keep their `character_id`.
    async fn delete_character(&self, id: Uuid, user_id: Uuid) -> StoreResult<u64>;

    // character_references
    async fn list_references(&self, character_id: Uuid) -> StoreResult<Vec<CharacterReference>>;
    async fn delete_reference(&self, character_id: Uuid, reference_id: Uuid) -> StoreResult<u64>;

    // character_favorites
    async fn favorite_task_ids(&self, character_id: Uuid, user_id: Uuid)
        -> StoreResult<Vec<String>>;
    async fn favorite_exists(&self, favorite: &NewFavorite) -> StoreResult<bool>;
    async fn insert_favorite(&self, favorite: &NewFavorite) -> StoreResult<()>;
    async fn delete_favorite(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        task_id: &str,
    ) -> StoreResult<u64>;

    // character_outfits
    async fn list_outfits(&self, character_id: Uuid, user_id: Uuid) -> StoreResult<Vec<Outfit>>;
    async fn insert_outfit(&self, outfit: &NewOutfit) -> StoreResult<Outfit>;
    async fn find_outfit(
        &self,
        id: Uuid,
        character_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Outfit>>;
    async fn update_outfit(&self, id: Uuid, update: &OutfitUpdate) -> StoreResult<Option<Outfit>>;
    async fn delete_outfit(&self, id: Uuid) -> StoreResult<u64>;

    // global_favorites, keyed by the owner's email
    async fn global_favorites(&self, email: &str) -> StoreResult<Vec<GlobalFavorite>>;
    async fn global_favorite_exists(&self, favorite: &GlobalFavorite) -> StoreResult<bool>;
    async fn insert_global_favorite(&self, favorite: &GlobalFavorite) -> StoreResult<()>;
    async fn delete_global_favorite(&self, email: &str, task_id: &str) -> StoreResult<u64>;

    // banned_users; emails are stored lower-cased
    async fn is_banned(&self, email: &str) -> StoreResult<bool>;
    async fn banned_emails(&self) -> StoreResult<Vec<String>>;
    async fn upsert_ban(&self, ban: &BannedUser) -> StoreResult<()>;
    async fn delete_ban(&self, email: &str) -> StoreResult<u64>;
}
