use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const STATUS_COMPLETED: &str = "completed";
pub const IN_FLIGHT_STATUSES: [&str; 3] = ["pending", "processing", "failed"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationTask {
    pub id: i64,
    pub task_id: String,
    pub task_type: String,
    pub status: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub prompt: Option<String>,
    pub input_image_url: Option<String>,
    pub input_video_url: Option<String>,
    pub output_image_url: Option<String>,
    pub output_video_url: Option<String>,
    pub background_image_url: Option<String>,
    pub character_id: Option<Uuid>,
    pub task_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Row shape for an insert; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: String,
    pub task_type: String,
    pub status: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub prompt: Option<String>,
    pub input_image_url: Option<String>,
    pub input_video_url: Option<String>,
    pub output_image_url: Option<String>,
    pub output_video_url: Option<String>,
    pub background_image_url: Option<String>,
    pub character_id: Option<Uuid>,
    pub task_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// Narrow projection read by the per-user activity scan.
#[derive(Debug, Clone)]
pub struct ActivityRow {
    pub email: String,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub output_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Character {
    pub id: Uuid,
    pub user_id: Uuid,
    pub char_name: String,
    pub char_avatar: Option<String>,
    pub char_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCharacter {
    pub user_id: Uuid,
    pub char_name: String,
    pub char_avatar: Option<String>,
    pub char_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterReference {
    pub id: Uuid,
    pub character_id: Uuid,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFavorite {
    pub character_id: Uuid,
    pub user_id: Uuid,
    pub task_id: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outfit {
    pub id: Uuid,
    pub character_id: Uuid,
    pub user_id: Uuid,
    pub outfit_name: String,
    pub outfit_image_url: Option<String>,
    pub outfit_type: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutfit {
    pub character_id: Uuid,
    pub user_id: Uuid,
    pub outfit_name: String,
    pub outfit_image_url: Option<String>,
    pub outfit_type: String,
    pub description: Option<String>,
}

/// Columns to overwrite; `None` leaves a column alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutfitUpdate {
    pub outfit_name: Option<String>,
    pub outfit_type: Option<String>,
    pub description: Option<Option<String>>,
}

impl OutfitUpdate {
    pub fn is_empty(&self) -> bool {
        self.outfit_name.is_none() && self.outfit_type.is_none() && self.description.is_none()
    }
}

/// A task favorited from the history view, independent of any character.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalFavorite {
    pub email: String,
    pub task_id: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BannedUser {
    pub email: String,
    pub reason: String,
    pub banned_by: Option<String>,
    pub banned_at: DateTime<Utc>,
}

// ---- request bodies and query strings ----

#[derive(Debug, Default, Deserialize)]
pub struct TaskLogRequest {
    pub task_id: Option<String>,
    pub task_type: Option<String>,
    pub status: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub task_time: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub prompt: Option<String>,
    pub input_image_url: Option<String>,
    pub input_video_url: Option<String>,
    pub output_image_url: Option<String>,
    pub output_video_url: Option<String>,
    pub background_image_url: Option<String>,
    pub character_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminTaskParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub task_type: Option<String>,
    pub task_id: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub task_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDeleteParams {
    pub task_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BanRequest {
    pub email: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailParams {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddFavoriteRequest {
    pub task_id: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FavoriteParams {
    pub task_id: Option<String>,
}

/// Distinguishes an absent field from an explicit `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOutfitRequest {
    pub outfit_name: Option<String>,
    pub outfit_type: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
}

// ---- responses ----

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub email: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminTasksResponse {
    pub tasks: Vec<GenerationTask>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub email: String,
    pub username: String,
    pub task_count: u64,
    pub image_count: u64,
    pub last_active_at: DateTime<Utc>,
    pub is_banned: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUsersResponse {
    pub users: Vec<UserSummary>,
    pub total_users: usize,
    pub banned_count: usize,
}

#[derive(Debug, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatsResponse {
    pub total_tasks: i64,
    pub today_tasks: i64,
    pub week_tasks: i64,
    pub active_users: i64,
    pub task_type_distribution: std::collections::BTreeMap<String, i64>,
    pub daily_stats: Vec<DailyCount>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPagination {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<GenerationTask>,
    pub pagination: HistoryPagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTasksResponse {
    pub pending_tasks: Vec<GenerationTask>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct CharactersResponse {
    pub characters: Vec<Character>,
}

#[derive(Debug, Serialize)]
pub struct CharacterResponse {
    pub character: Character,
}

#[derive(Debug, Serialize)]
pub struct OutfitsResponse {
    pub outfits: Vec<Outfit>,
}

#[derive(Debug, Serialize)]
pub struct OutfitResponse {
    pub outfit: Outfit,
}

#[derive(Debug, Serialize)]
pub struct ReferencesResponse {
    pub references: Vec<CharacterReference>,
}

/// A generation task as shown in a character's gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    pub id: i64,
    pub task_id: String,
    pub task_type: String,
    pub output_image_url: Option<String>,
    pub output_video_url: Option<String>,
    pub prompt: Option<String>,
    pub task_time: Option<DateTime<Utc>>,
    pub is_favorite: bool,
}

impl Asset {
    pub fn from_task(task: GenerationTask, is_favorite: bool) -> Self {
        Self {
            id: task.id,
            task_id: task.task_id,
            task_type: task.task_type,
            output_image_url: task.output_image_url,
            output_video_url: task.output_video_url,
            prompt: task.prompt,
            task_time: task.task_time,
            is_favorite,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssetsResponse {
    pub assets: Vec<Asset>,
}

#[derive(Debug, Serialize)]
pub struct FavoritesResponse {
    pub favorites: Vec<Asset>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlingGenerateRequest {
    pub start_image_url: Option<String>,
    pub end_image_url: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoToLiveRequest {
    pub image_url: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlingQueryParams {
    pub task_id: Option<String>,
}

/// Aimovely ids are passed through untouched; they may be numbers or strings.
#[derive(Debug, Default, Deserialize)]
pub struct VideoGenerateRequest {
    pub generate_type: Option<serde_json::Value>,
    pub origin_resource_id: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoQueryRequest {
    pub task_id: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoDownloadParams {
    pub target: Option<String>,
}

// ---- multipart bodies ----

#[derive(Debug, Clone)]
pub struct FormFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Text fields and file parts of a multipart body, keyed by field name.
#[derive(Debug, Default)]
pub struct FormData {
    pub fields: std::collections::HashMap<String, String>,
    pub files: std::collections::HashMap<String, FormFile>,
}

impl FormData {
    /// Trimmed, non-empty text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn take_file(&mut self, name: &str) -> Option<FormFile> {
        self.files.remove(name)
    }
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxResponse {
    pub images: Vec<String>,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseCaptionResponse {
    pub pose_caption: String,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub url: String,
    pub filename: String,
    pub size: usize,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct AimovelyUploadResponse {
    pub url: String,
    pub resource_id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biz: Option<String>,
}
