use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::{types::ToSql, Client, NoTls, Row};
use uuid::Uuid;

use super::{Store, StoreResult, TaskFilter, TaskOrder, TaskPage, TaskQuery};
use crate::models::{
    ActivityRow, BannedUser, Character, CharacterReference, GenerationTask, GlobalFavorite,
    NewCharacter, NewFavorite, NewOutfit, NewTask, Outfit, OutfitUpdate,
};

const TASK_COLUMNS: &str = "id, task_id, task_type, status, email, username, prompt, \
input_image_url, input_video_url, output_image_url, output_video_url, background_image_url, \
character_id, task_time, created_at, started_at";

const SQL_INSERT_TASK: &str = "INSERT INTO generation_tasks \
(task_id, task_type, status, email, username, prompt, input_image_url, input_video_url, \
output_image_url, output_video_url, background_image_url, character_id, task_time, started_at) \
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)";
const SQL_ACTIVITY_BATCH: &str = "SELECT email, username, created_at, output_image_url \
FROM generation_tasks WHERE email IS NOT NULL ORDER BY created_at DESC, id DESC \
OFFSET $1 LIMIT $2";
const SQL_DELETE_OWNED_TASKS: &str =
    "DELETE FROM generation_tasks WHERE task_id = $1 AND email = $2";
const SQL_DELETE_CHARACTER_TASK: &str =
    "DELETE FROM generation_tasks WHERE character_id = $1 AND task_id = $2";
const SQL_COUNT_TASKS: &str = "SELECT COUNT(*) FROM generation_tasks \
WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
AND ($2::timestamptz IS NULL OR created_at < $2)";
const SQL_TASK_TYPE_COUNTS: &str =
    "SELECT task_type, COUNT(*) AS count FROM generation_tasks GROUP BY task_type";
const SQL_COUNT_ACTIVE_EMAILS: &str =
    "SELECT COUNT(DISTINCT email) FROM generation_tasks WHERE email IS NOT NULL";

const CHARACTER_COLUMNS: &str = "id, user_id, char_name, char_avatar, char_image, created_at";
const SQL_DELETE_CHARACTER: &str = "DELETE FROM characters WHERE id = $1 AND user_id = $2";

const SQL_LIST_REFERENCES: &str = "SELECT id, character_id, image_url, created_at \
FROM character_references WHERE character_id = $1 ORDER BY created_at DESC";
const SQL_DELETE_REFERENCE: &str =
    "DELETE FROM character_references WHERE id = $1 AND character_id = $2";

const SQL_FAVORITE_TASK_IDS: &str = "SELECT task_id FROM character_favorites \
WHERE character_id = $1 AND user_id = $2 ORDER BY created_at DESC";
const SQL_FAVORITE_EXISTS: &str = "SELECT 1 FROM character_favorites \
WHERE character_id = $1 AND user_id = $2 AND task_id = $3 \
AND image_url IS NOT DISTINCT FROM $4 LIMIT 1";
const SQL_INSERT_FAVORITE: &str = "INSERT INTO character_favorites \
(character_id, user_id, task_id, image_url) VALUES ($1, $2, $3, $4)";
const SQL_DELETE_FAVORITE: &str = "DELETE FROM character_favorites \
WHERE character_id = $1 AND user_id = $2 AND task_id = $3";

const OUTFIT_COLUMNS: &str = "id, character_id, user_id, outfit_name, outfit_image_url, \
outfit_type, description, created_at";
const SQL_DELETE_OUTFIT: &str = "DELETE FROM character_outfits WHERE id = $1";

const SQL_GLOBAL_FAVORITES: &str = "SELECT user_email, task_id, image_url \
FROM global_favorites WHERE user_email = $1 ORDER BY created_at DESC";
const SQL_GLOBAL_FAVORITE_EXISTS: &str = "SELECT 1 FROM global_favorites \
WHERE user_email = $1 AND task_id = $2 AND image_url IS NOT DISTINCT FROM $3 LIMIT 1";
const SQL_INSERT_GLOBAL_FAVORITE: &str =
    "INSERT INTO global_favorites (user_email, task_id, image_url) VALUES ($1, $2, $3)";
const SQL_DELETE_GLOBAL_FAVORITE: &str =
    "DELETE FROM global_favorites WHERE user_email = $1 AND task_id = $2";

const SQL_IS_BANNED: &str = "SELECT 1 FROM banned_users WHERE email = $1 LIMIT 1";
const SQL_BANNED_EMAILS: &str = "SELECT email FROM banned_users";
const SQL_UPSERT_BAN: &str = "INSERT INTO banned_users (email, reason, banned_by, banned_at) \
VALUES ($1, $2, $3, $4) ON CONFLICT (email) DO UPDATE \
SET reason = EXCLUDED.reason, banned_by = EXCLUDED.banned_by, banned_at = EXCLUDED.banned_at";
const SQL_DELETE_BAN: &str = "DELETE FROM banned_users WHERE email = $1";

/// Escapes `%`, `_` and `\` so user input matches literally inside ILIKE.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn push_param(params: &mut Vec<String>, value: String) -> usize {
    params.push(value);
    params.len()
}

/// Builds the WHERE clause for a task listing along with its text parameters,
/// numbered from `$1` in order.
pub fn task_where_clause(filter: &TaskFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    if let Some(owner) = &filter.owner_email {
        let n = push_param(&mut params, owner.clone());
        clauses.push(format!("email = ${n}"));
    }
    if let Some(task_type) = &filter.task_type {
        let n = push_param(&mut params, task_type.clone());
        clauses.push(format!("task_type = ${n}"));
    }
    if let Some(task_id) = &filter.task_id {
        let n = push_param(&mut params, like_pattern(task_id));
        clauses.push(format!("task_id ILIKE ${n}"));
    }
    for (column, needles) in [("email", &filter.emails), ("username", &filter.usernames)] {
        if needles.is_empty() {
            continue;
        }
        let alternatives: Vec<String> = needles
            .iter()
            .map(|needle| {
                let n = push_param(&mut params, like_pattern(needle));
                format!("{column} ILIKE ${n}")
            })
            .collect();
        clauses.push(format!("({})", alternatives.join(" OR ")));
    }
    if let Some(prompt) = &filter.prompt {
        let n = push_param(&mut params, like_pattern(prompt));
        clauses.push(format!("prompt ILIKE ${n}"));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

fn order_clause(order: TaskOrder) -> &'static str {
    match order {
        TaskOrder::CreatedAtDesc => " ORDER BY created_at DESC, id DESC",
        TaskOrder::TaskTimeDesc => " ORDER BY task_time DESC NULLS LAST, id DESC",
    }
}

fn task_from_row(row: &Row) -> GenerationTask {
    GenerationTask {
        id: row.get("id"),
        task_id: row.get("task_id"),
        task_type: row.get("task_type"),
        status: row.get("status"),
        email: row.get("email"),
        username: row.get("username"),
        prompt: row.get("prompt"),
        input_image_url: row.get("input_image_url"),
        input_video_url: row.get("input_video_url"),
        output_image_url: row.get("output_image_url"),
        output_video_url: row.get("output_video_url"),
        background_image_url: row.get("background_image_url"),
        character_id: row.get("character_id"),
        task_time: row.get("task_time"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
    }
}

fn character_from_row(row: &Row) -> Character {
    Character {
        id: row.get("id"),
        user_id: row.get("user_id"),
        char_name: row.get("char_name"),
        char_avatar: row.get("char_avatar"),
        char_image: row.get("char_image"),
        created_at: row.get("created_at"),
    }
}

fn outfit_from_row(row: &Row) -> Outfit {
    Outfit {
        id: row.get("id"),
        character_id: row.get("character_id"),
        user_id: row.get("user_id"),
        outfit_name: row.get("outfit_name"),
        outfit_image_url: row.get("outfit_image_url"),
        outfit_type: row.get("outfit_type"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

fn as_params(values: &[String]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|value| value as &(dyn ToSql + Sync)).collect()
}

/// Postgres-backed store over a single shared connection.
pub struct PgStore {
    db: Mutex<Client>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, String> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|err| format!("database connect failed: {err}"))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection error");
            }
        });

        Ok(Self {
            db: Mutex::new(client),
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_task(&self, task: &NewTask) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.execute(
            SQL_INSERT_TASK,
            &[
                &task.task_id,
                &task.task_type,
                &task.status,
                &task.email,
                &task.username,
                &task.prompt,
                &task.input_image_url,
                &task.input_video_url,
                &task.output_image_url,
                &task.output_video_url,
                &task.background_image_url,
                &task.character_id,
                &task.task_time,
                &task.started_at,
            ],
        )
        .await
        .map_err(|err| format!("insert task failed: {err}"))?;
        Ok(())
    }

    async fn list_tasks(&self, query: &TaskQuery) -> StoreResult<TaskPage> {
        let (where_clause, values) = task_where_clause(&query.filter);
        let params = as_params(&values);
        let count_sql = format!("SELECT COUNT(*) FROM generation_tasks{where_clause}");
        // limit and offset are clamped integers, safe to inline.
        let select_sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks{where_clause}{} LIMIT {} OFFSET {}",
            order_clause(query.order),
            query.limit.max(0),
            query.offset.max(0),
        );

        let db = self.db.lock().await;
        let total: i64 = db
            .query_one(count_sql.as_str(), &params)
            .await
            .map_err(|err| format!("count tasks failed: {err}"))?
            .get(0);
        let rows = db
            .query(select_sql.as_str(), &params)
            .await
            .map_err(|err| format!("list tasks failed: {err}"))?;

        Ok(TaskPage {
            tasks: rows.iter().map(task_from_row).collect(),
            total,
        })
    }

    async fn activity_batch(&self, offset: i64, limit: i64) -> StoreResult<Vec<ActivityRow>> {
        let db = self.db.lock().await;
        let rows = db
            .query(SQL_ACTIVITY_BATCH, &[&offset, &limit])
            .await
            .map_err(|err| format!("activity scan failed: {err}"))?;

        Ok(rows
            .into_iter()
            .map(|row| ActivityRow {
                email: row.get("email"),
                username: row.get("username"),
                created_at: row.get("created_at"),
                output_image_url: row.get("output_image_url"),
            })
            .collect())
    }

    async fn in_flight_tasks(
        &self,
        email: &str,
        character_id: Option<Uuid>,
    ) -> StoreResult<Vec<GenerationTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks \
             WHERE email = $1 AND status IN ('pending', 'processing', 'failed') \
             AND ($2::uuid IS NULL OR character_id = $2) \
             ORDER BY started_at DESC NULLS LAST, id DESC"
        );
        let db = self.db.lock().await;
        let rows = db
            .query(sql.as_str(), &[&email, &character_id])
            .await
            .map_err(|err| format!("list pending tasks failed: {err}"))?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn find_task(&self, task_id: &str) -> StoreResult<Option<GenerationTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM generation_tasks WHERE task_id = $1 LIMIT 1");
        let db = self.db.lock().await;
        let row = db
            .query_opt(sql.as_str(), &[&task_id])
            .await
            .map_err(|err| format!("select task failed: {err}"))?;
        Ok(row.as_ref().map(task_from_row))
    }

    async fn delete_owned_tasks(&self, task_id: &str, email: &str) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_OWNED_TASKS, &[&task_id, &email])
            .await
            .map_err(|err| format!("delete task failed: {err}"))
    }

    async fn completed_character_tasks(
        &self,
        character_id: Uuid,
    ) -> StoreResult<Vec<GenerationTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks \
             WHERE character_id = $1 AND status = 'completed' \
             ORDER BY task_time DESC NULLS LAST, id DESC"
        );
        let db = self.db.lock().await;
        let rows = db
            .query(sql.as_str(), &[&character_id])
            .await
            .map_err(|err| format!("list character tasks failed: {err}"))?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn completed_tasks_by_ids(&self, task_ids: &[String]) -> StoreResult<Vec<GenerationTask>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks \
             WHERE task_id = ANY($1) AND status = 'completed' \
             ORDER BY task_time DESC NULLS LAST, id DESC"
        );
        let ids: Vec<&str> = task_ids.iter().map(String::as_str).collect();
        let db = self.db.lock().await;
        let rows = db
            .query(sql.as_str(), &[&ids])
            .await
            .map_err(|err| format!("list favorite tasks failed: {err}"))?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn find_character_task(
        &self,
        character_id: Uuid,
        task_id: &str,
    ) -> StoreResult<Option<GenerationTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks \
             WHERE character_id = $1 AND task_id = $2 LIMIT 1"
        );
        let db = self.db.lock().await;
        let row = db
            .query_opt(sql.as_str(), &[&character_id, &task_id])
            .await
            .map_err(|err| format!("select character task failed: {err}"))?;
        Ok(row.as_ref().map(task_from_row))
    }

    async fn delete_character_task(&self, character_id: Uuid, task_id: &str) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_CHARACTER_TASK, &[&character_id, &task_id])
            .await
            .map_err(|err| format!("delete character task failed: {err}"))
    }

    async fn count_tasks(
        &self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let db = self.db.lock().await;
        let row = db
            .query_one(SQL_COUNT_TASKS, &[&from, &until])
            .await
            .map_err(|err| format!("count tasks failed: {err}"))?;
        Ok(row.get(0))
    }

    async fn task_type_counts(&self) -> StoreResult<Vec<(String, i64)>> {
        let db = self.db.lock().await;
        let rows = db
            .query(SQL_TASK_TYPE_COUNTS, &[])
            .await
            .map_err(|err| format!("task type counts failed: {err}"))?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("task_type"), row.get("count")))
            .collect())
    }

    async fn count_active_emails(&self) -> StoreResult<i64> {
        let db = self.db.lock().await;
        let row = db
            .query_one(SQL_COUNT_ACTIVE_EMAILS, &[])
            .await
            .map_err(|err| format!("count active users failed: {err}"))?;
        Ok(row.get(0))
    }

    async fn list_characters(&self, user_id: Uuid) -> StoreResult<Vec<Character>> {
        let sql = format!(
            "SELECT {CHARACTER_COLUMNS} FROM characters WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let db = self.db.lock().await;
        let rows = db
            .query(sql.as_str(), &[&user_id])
            .await
            .map_err(|err| format!("list characters failed: {err}"))?;
        Ok(rows.iter().map(character_from_row).collect())
    }

    async fn insert_character(&self, character: &NewCharacter) -> StoreResult<Character> {
        let sql = format!(
            "INSERT INTO characters (user_id, char_name, char_avatar, char_image) \
             VALUES ($1, $2, $3, $4) RETURNING {CHARACTER_COLUMNS}"
        );
        let db = self.db.lock().await;
        let row = db
            .query_one(
                sql.as_str(),
                &[
                    &character.user_id,
                    &character.char_name,
                    &character.char_avatar,
                    &character.char_image,
                ],
            )
            .await
            .map_err(|err| format!("insert character failed: {err}"))?;
        Ok(character_from_row(&row))
    }

    async fn find_character(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Character>> {
        let sql =
            format!("SELECT {CHARACTER_COLUMNS} FROM characters WHERE id = $1 AND user_id = $2");
        let db = self.db.lock().await;
        let row = db
            .query_opt(sql.as_str(), &[&id, &user_id])
            .await
            .map_err(|err| format!("select character failed: {err}"))?;
        Ok(row.as_ref().map(character_from_row))
    }

    async fn delete_character(&self, id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_CHARACTER, &[&id, &user_id])
            .await
            .map_err(|err| format!("delete character failed: {err}"))
    }

    async fn list_references(&self, character_id: Uuid) -> StoreResult<Vec<CharacterReference>> {
        let db = self.db.lock().await;
        let rows = db
            .query(SQL_LIST_REFERENCES, &[&character_id])
            .await
            .map_err(|err| format!("list references failed: {err}"))?;
        Ok(rows
            .into_iter()
            .map(|row| CharacterReference {
                id: row.get("id"),
                character_id: row.get("character_id"),
                image_url: row.get("image_url"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete_reference(&self, character_id: Uuid, reference_id: Uuid) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_REFERENCE, &[&reference_id, &character_id])
            .await
            .map_err(|err| format!("delete reference failed: {err}"))
    }

    async fn favorite_task_ids(
        &self,
        character_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<String>> {
        let db = self.db.lock().await;
        let rows = db
            .query(SQL_FAVORITE_TASK_IDS, &[&character_id, &user_id])
            .await
            .map_err(|err| format!("list favorites failed: {err}"))?;
        Ok(rows.into_iter().map(|row| row.get("task_id")).collect())
    }

    async fn favorite_exists(&self, favorite: &NewFavorite) -> StoreResult<bool> {
        let db = self.db.lock().await;
        let row = db
            .query_opt(
                SQL_FAVORITE_EXISTS,
                &[
                    &favorite.character_id,
                    &favorite.user_id,
                    &favorite.task_id,
                    &favorite.image_url,
                ],
            )
            .await
            .map_err(|err| format!("select favorite failed: {err}"))?;
        Ok(row.is_some())
    }

    async fn insert_favorite(&self, favorite: &NewFavorite) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.execute(
            SQL_INSERT_FAVORITE,
            &[
                &favorite.character_id,
                &favorite.user_id,
                &favorite.task_id,
                &favorite.image_url,
            ],
        )
        .await
        .map_err(|err| format!("insert favorite failed: {err}"))?;
        Ok(())
    }

    async fn delete_favorite(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        task_id: &str,
    ) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_FAVORITE, &[&character_id, &user_id, &task_id])
            .await
            .map_err(|err| format!("delete favorite failed: {err}"))
    }

    async fn list_outfits(&self, character_id: Uuid, user_id: Uuid) -> StoreResult<Vec<Outfit>> {
        let sql = format!(
            "SELECT {OUTFIT_COLUMNS} FROM character_outfits \
             WHERE character_id = $1 AND user_id = $2 ORDER BY created_at DESC"
        );
        let db = self.db.lock().await;
        let rows = db
            .query(sql.as_str(), &[&character_id, &user_id])
            .await
            .map_err(|err| format!("list outfits failed: {err}"))?;
        Ok(rows.iter().map(outfit_from_row).collect())
    }

    async fn insert_outfit(&self, outfit: &NewOutfit) -> StoreResult<Outfit> {
        let sql = format!(
            "INSERT INTO character_outfits \
             (character_id, user_id, outfit_name, outfit_image_url, outfit_type, description) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {OUTFIT_COLUMNS}"
        );
        let db = self.db.lock().await;
        let row = db
            .query_one(
                sql.as_str(),
                &[
                    &outfit.character_id,
                    &outfit.user_id,
                    &outfit.outfit_name,
                    &outfit.outfit_image_url,
                    &outfit.outfit_type,
                    &outfit.description,
                ],
            )
            .await
            .map_err(|err| format!("insert outfit failed: {err}"))?;
        Ok(outfit_from_row(&row))
    }

    async fn find_outfit(
        &self,
        id: Uuid,
        character_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Outfit>> {
        let sql = format!(
            "SELECT {OUTFIT_COLUMNS} FROM character_outfits \
             WHERE id = $1 AND character_id = $2 AND user_id = $3"
        );
        let db = self.db.lock().await;
        let row = db
            .query_opt(sql.as_str(), &[&id, &character_id, &user_id])
            .await
            .map_err(|err| format!("select outfit failed: {err}"))?;
        Ok(row.as_ref().map(outfit_from_row))
    }

    async fn update_outfit(&self, id: Uuid, update: &OutfitUpdate) -> StoreResult<Option<Outfit>> {
        // $4 says whether description is being written at all, so it can be cleared to NULL.
        let sql = format!(
            "UPDATE character_outfits SET \
             outfit_name = COALESCE($2, outfit_name), \
             outfit_type = COALESCE($3, outfit_type), \
             description = CASE WHEN $4 THEN $5 ELSE description END \
             WHERE id = $1 RETURNING {OUTFIT_COLUMNS}"
        );
        let set_description = update.description.is_some();
        let description = update.description.clone().flatten();
        let db = self.db.lock().await;
        let row = db
            .query_opt(
                sql.as_str(),
                &[
                    &id,
                    &update.outfit_name,
                    &update.outfit_type,
                    &set_description,
                    &description,
                ],
            )
            .await
            .map_err(|err| format!("update outfit failed: {err}"))?;
        Ok(row.as_ref().map(outfit_from_row))
    }

    async fn delete_outfit(&self, id: Uuid) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_OUTFIT, &[&id])
            .await
            .map_err(|err| format!("delete outfit failed: {err}"))
    }

    async fn global_favorites(&self, email: &str) -> StoreResult<Vec<GlobalFavorite>> {
        let db = self.db.lock().await;
        let rows = db
            .query(SQL_GLOBAL_FAVORITES, &[&email])
            .await
            .map_err(|err| format!("list global favorites failed: {err}"))?;
        Ok(rows
            .into_iter()
            .map(|row| GlobalFavorite {
                email: row.get("user_email"),
                task_id: row.get("task_id"),
                image_url: row.get("image_url"),
            })
            .collect())
    }

    async fn global_favorite_exists(&self, favorite: &GlobalFavorite) -> StoreResult<bool> {
        let db = self.db.lock().await;
        let row = db
            .query_opt(
                SQL_GLOBAL_FAVORITE_EXISTS,
                &[&favorite.email, &favorite.task_id, &favorite.image_url],
            )
            .await
            .map_err(|err| format!("select global favorite failed: {err}"))?;
        Ok(row.is_some())
    }

    async fn insert_global_favorite(&self, favorite: &GlobalFavorite) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.execute(
            SQL_INSERT_GLOBAL_FAVORITE,
            &[&favorite.email, &favorite.task_id, &favorite.image_url],
        )
        .await
        .map_err(|err| format!("insert global favorite failed: {err}"))?;
        Ok(())
    }

    async fn delete_global_favorite(&self, email: &str, task_id: &str) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_GLOBAL_FAVORITE, &[&email, &task_id])
            .await
            .map_err(|err| format!("delete global favorite failed: {err}"))
    }

    async fn is_banned(&self, email: &str) -> StoreResult<bool> {
        let db = self.db.lock().await;
        let row = db
            .query_opt(SQL_IS_BANNED, &[&email])
            .await
            .map_err(|err| format!("ban lookup failed: {err}"))?;
        Ok(row.is_some())
    }

    async fn banned_emails(&self) -> StoreResult<Vec<String>> {
        let db = self.db.lock().await;
        let rows = db
            .query(SQL_BANNED_EMAILS, &[])
            .await
            .map_err(|err| format!("list banned users failed: {err}"))?;
        Ok(rows.into_iter().map(|row| row.get("email")).collect())
    }

    async fn upsert_ban(&self, ban: &BannedUser) -> StoreResult<()> {
        let db = self.db.lock().await;
        db.execute(
            SQL_UPSERT_BAN,
            &[&ban.email, &ban.reason, &ban.banned_by, &ban.banned_at],
        )
        .await
        .map_err(|err| format!("upsert ban failed: {err}"))?;
        Ok(())
    }

    async fn delete_ban(&self, email: &str) -> StoreResult<u64> {
        let db = self.db.lock().await;
        db.execute(SQL_DELETE_BAN, &[&email])
            .await
            .map_err(|err| format!("delete ban failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_where_clause() {
        let (clause, params) = task_where_clause(&TaskFilter::default());
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn multi_value_groups_become_or_clauses() {
        let filter = TaskFilter {
            task_type: Some("flux".to_string()),
            emails: vec!["a@x".to_string(), "b@x".to_string()],
            prompt: Some("cat".to_string()),
            ..TaskFilter::default()
        };
        let (clause, params) = task_where_clause(&filter);
        assert_eq!(
            clause,
            " WHERE task_type = $1 AND (email ILIKE $2 OR email ILIKE $3) AND prompt ILIKE $4"
        );
        assert_eq!(params, vec!["flux", "%a@x%", "%b@x%", "%cat%"]);
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
