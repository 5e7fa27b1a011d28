use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Store, StoreResult, TaskOrder, TaskPage, TaskQuery};
use crate::models::{
    ActivityRow, BannedUser, Character, CharacterReference, GenerationTask, GlobalFavorite,
    NewCharacter, NewFavorite, NewOutfit, NewTask, Outfit, OutfitUpdate, IN_FLIGHT_STATUSES,
    STATUS_COMPLETED,
};

#[derive(Clone)]
struct FavoriteRow {
    character_id: Uuid,
    user_id: Uuid,
    task_id: String,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Clone)]
struct GlobalFavoriteRow {
    favorite: GlobalFavorite,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    next_task_id: i64,
    tasks: Vec<GenerationTask>,
    characters: Vec<Character>,
    references: Vec<CharacterReference>,
    favorites: Vec<FavoriteRow>,
    outfits: Vec<Outfit>,
    global_favorites: Vec<GlobalFavoriteRow>,
    bans: Vec<BannedUser>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully-formed row, keeping its timestamps.
    #[cfg(test)]
    pub async fn seed_task(&self, task: GenerationTask) {
        let mut tables = self.tables.lock().await;
        tables.next_task_id = tables.next_task_id.max(task.id);
        tables.tasks.push(task);
    }

    #[cfg(test)]
    pub async fn seed_character(&self, character: Character) {
        self.tables.lock().await.characters.push(character);
    }

    #[cfg(test)]
    pub async fn seed_reference(&self, reference: CharacterReference) {
        self.tables.lock().await.references.push(reference);
    }

    #[cfg(test)]
    pub async fn seed_outfit(&self, outfit: Outfit) {
        self.tables.lock().await.outfits.push(outfit);
    }

    #[cfg(test)]
    pub async fn all_tasks(&self) -> Vec<GenerationTask> {
        self.tables.lock().await.tasks.clone()
    }

    /// Row counts of `(references, favorites, outfits)` still pointing at a character.
    #[cfg(test)]
    pub async fn dependents_of(&self, character_id: Uuid) -> (usize, usize, usize) {
        let tables = self.tables.lock().await;
        (
            tables.references.iter().filter(|row| row.character_id == character_id).count(),
            tables.favorites.iter().filter(|row| row.character_id == character_id).count(),
            tables.outfits.iter().filter(|row| row.character_id == character_id).count(),
        )
    }
}

fn newest_first<T, K: Ord>(rows: &mut [T], key: impl Fn(&T) -> K) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_task(&self, task: &NewTask) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.next_task_id += 1;
        let id = tables.next_task_id;
        tables.tasks.push(GenerationTask {
            id,
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            status: Some(task.status.clone()),
            email: task.email.clone(),
            username: task.username.clone(),
            prompt: task.prompt.clone(),
            input_image_url: task.input_image_url.clone(),
            input_video_url: task.input_video_url.clone(),
            output_image_url: task.output_image_url.clone(),
            output_video_url: task.output_video_url.clone(),
            background_image_url: task.background_image_url.clone(),
            character_id: task.character_id,
            task_time: Some(task.task_time),
            created_at: Utc::now(),
            started_at: Some(task.started_at),
        });
        Ok(())
    }

    async fn list_tasks(&self, query: &TaskQuery) -> StoreResult<TaskPage> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<GenerationTask> = tables
            .tasks
            .iter()
            .filter(|task| query.filter.matches(task))
            .cloned()
            .collect();
        match query.order {
            TaskOrder::CreatedAtDesc => newest_first(&mut rows, |task| (task.created_at, task.id)),
            TaskOrder::TaskTimeDesc => newest_first(&mut rows, |task| (task.task_time, task.id)),
        }
        let total = rows.len() as i64;
        let tasks = rows
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok(TaskPage { tasks, total })
    }

    async fn activity_batch(&self, offset: i64, limit: i64) -> StoreResult<Vec<ActivityRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<&GenerationTask> =
            tables.tasks.iter().filter(|task| task.email.is_some()).collect();
        newest_first(&mut rows, |task| (task.created_at, task.id));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .filter_map(|task| {
                task.email.clone().map(|email| ActivityRow {
                    email,
                    username: task.username.clone(),
                    created_at: task.created_at,
                    output_image_url: task.output_image_url.clone(),
                })
            })
            .collect())
    }

    async fn in_flight_tasks(
        &self,
        email: &str,
        character_id: Option<Uuid>,
    ) -> StoreResult<Vec<GenerationTask>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<GenerationTask> = tables
            .tasks
            .iter()
            .filter(|task| task.email.as_deref() == Some(email))
            .filter(|task| character_id.is_none() || task.character_id == character_id)
            .filter(|task| {
                task.status
                    .as_deref()
                    .map(|status| IN_FLIGHT_STATUSES.contains(&status))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        newest_first(&mut rows, |task| (task.started_at, task.id));
        Ok(rows)
    }

    async fn find_task(&self, task_id: &str) -> StoreResult<Option<GenerationTask>> {
        let tables = self.tables.lock().await;
        Ok(tables.tasks.iter().find(|task| task.task_id == task_id).cloned())
    }

    async fn delete_owned_tasks(&self, task_id: &str, email: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.tasks.len();
        tables
            .tasks
            .retain(|task| !(task.task_id == task_id && task.email.as_deref() == Some(email)));
        Ok((before - tables.tasks.len()) as u64)
    }

    async fn completed_character_tasks(
        &self,
        character_id: Uuid,
    ) -> StoreResult<Vec<GenerationTask>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<GenerationTask> = tables
            .tasks
            .iter()
            .filter(|task| task.character_id == Some(character_id))
            .filter(|task| task.status.as_deref() == Some(STATUS_COMPLETED))
            .cloned()
            .collect();
        newest_first(&mut rows, |task| (task.task_time, task.id));
        Ok(rows)
    }

    async fn completed_tasks_by_ids(&self, task_ids: &[String]) -> StoreResult<Vec<GenerationTask>> {
        let wanted: HashSet<&str> = task_ids.iter().map(String::as_str).collect();
        let tables = self.tables.lock().await;
        let mut rows: Vec<GenerationTask> = tables
            .tasks
            .iter()
            .filter(|task| wanted.contains(task.task_id.as_str()))
            .filter(|task| task.status.as_deref() == Some(STATUS_COMPLETED))
            .cloned()
            .collect();
        newest_first(&mut rows, |task| (task.task_time, task.id));
        Ok(rows)
    }

    async fn find_character_task(
        &self,
        character_id: Uuid,
        task_id: &str,
    ) -> StoreResult<Option<GenerationTask>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .iter()
            .find(|task| task.task_id == task_id && task.character_id == Some(character_id))
            .cloned())
    }

    async fn delete_character_task(&self, character_id: Uuid, task_id: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.tasks.len();
        tables
            .tasks
            .retain(|task| !(task.task_id == task_id && task.character_id == Some(character_id)));
        Ok((before - tables.tasks.len()) as u64)
    }

    async fn count_tasks(
        &self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .iter()
            .filter(|task| from.map(|from| task.created_at >= from).unwrap_or(true))
            .filter(|task| until.map(|until| task.created_at < until).unwrap_or(true))
            .count() as i64)
    }

    async fn task_type_counts(&self) -> StoreResult<Vec<(String, i64)>> {
        let tables = self.tables.lock().await;
        let mut counts: Vec<(String, i64)> = Vec::new();
        for task in &tables.tasks {
            match counts.iter_mut().find(|(task_type, _)| *task_type == task.task_type) {
                Some((_, count)) => *count += 1,
                None => counts.push((task.task_type.clone(), 1)),
            }
        }
        Ok(counts)
    }

    async fn count_active_emails(&self) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        let emails: HashSet<&str> = tables
            .tasks
            .iter()
            .filter_map(|task| task.email.as_deref())
            .collect();
        Ok(emails.len() as i64)
    }

    async fn list_characters(&self, user_id: Uuid) -> StoreResult<Vec<Character>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Character> = tables
            .characters
            .iter()
            .filter(|character| character.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |character| character.created_at);
        Ok(rows)
    }

    async fn insert_character(&self, character: &NewCharacter) -> StoreResult<Character> {
        let row = Character {
            id: Uuid::new_v4(),
            user_id: character.user_id,
            char_name: character.char_name.clone(),
            char_avatar: character.char_avatar.clone(),
            char_image: character.char_image.clone(),
            created_at: Utc::now(),
        };
        self.tables.lock().await.characters.push(row.clone());
        Ok(row)
    }

    async fn find_character(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Character>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .characters
            .iter()
            .find(|character| character.id == id && character.user_id == user_id)
            .cloned())
    }

    async fn delete_character(&self, id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.characters.len();
        tables
            .characters
            .retain(|character| !(character.id == id && character.user_id == user_id));
        let removed = (before - tables.characters.len()) as u64;
        if removed > 0 {
            tables.references.retain(|row| row.character_id != id);
            tables.favorites.retain(|row| row.character_id != id);
            tables.outfits.retain(|row| row.character_id != id);
        }
        Ok(removed)
    }

    async fn list_references(&self, character_id: Uuid) -> StoreResult<Vec<CharacterReference>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<CharacterReference> = tables
            .references
            .iter()
            .filter(|reference| reference.character_id == character_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |reference| reference.created_at);
        Ok(rows)
    }

    async fn delete_reference(&self, character_id: Uuid, reference_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.references.len();
        tables.references.retain(|reference| {
            !(reference.id == reference_id && reference.character_id == character_id)
        });
        Ok((before - tables.references.len()) as u64)
    }

    async fn favorite_task_ids(
        &self,
        character_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<&FavoriteRow> = tables
            .favorites
            .iter()
            .filter(|favorite| favorite.character_id == character_id && favorite.user_id == user_id)
            .collect();
        newest_first(&mut rows, |favorite| favorite.created_at);
        Ok(rows.into_iter().map(|favorite| favorite.task_id.clone()).collect())
    }

    async fn favorite_exists(&self, favorite: &NewFavorite) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.favorites.iter().any(|row| {
            row.character_id == favorite.character_id
                && row.user_id == favorite.user_id
                && row.task_id == favorite.task_id
                && row.image_url == favorite.image_url
        }))
    }

    async fn insert_favorite(&self, favorite: &NewFavorite) -> StoreResult<()> {
        self.tables.lock().await.favorites.push(FavoriteRow {
            character_id: favorite.character_id,
            user_id: favorite.user_id,
            task_id: favorite.task_id.clone(),
            image_url: favorite.image_url.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_favorite(
        &self,
        character_id: Uuid,
        user_id: Uuid,
        task_id: &str,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.favorites.len();
        tables.favorites.retain(|row| {
            !(row.character_id == character_id && row.user_id == user_id && row.task_id == task_id)
        });
        Ok((before - tables.favorites.len()) as u64)
    }

    async fn list_outfits(&self, character_id: Uuid, user_id: Uuid) -> StoreResult<Vec<Outfit>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Outfit> = tables
            .outfits
            .iter()
            .filter(|outfit| outfit.character_id == character_id && outfit.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |outfit| outfit.created_at);
        Ok(rows)
    }

    async fn insert_outfit(&self, outfit: &NewOutfit) -> StoreResult<Outfit> {
        let row = Outfit {
            id: Uuid::new_v4(),
            character_id: outfit.character_id,
            user_id: outfit.user_id,
            outfit_name: outfit.outfit_name.clone(),
            outfit_image_url: outfit.outfit_image_url.clone(),
            outfit_type: outfit.outfit_type.clone(),
            description: outfit.description.clone(),
            created_at: Utc::now(),
        };
        self.tables.lock().await.outfits.push(row.clone());
        Ok(row)
    }

    async fn find_outfit(
        &self,
        id: Uuid,
        character_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Outfit>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .outfits
            .iter()
            .find(|outfit| {
                outfit.id == id && outfit.character_id == character_id && outfit.user_id == user_id
            })
            .cloned())
    }

    async fn update_outfit(&self, id: Uuid, update: &OutfitUpdate) -> StoreResult<Option<Outfit>> {
        let mut tables = self.tables.lock().await;
        let Some(outfit) = tables.outfits.iter_mut().find(|outfit| outfit.id == id) else {
            return Ok(None);
        };
        if let Some(name) = &update.outfit_name {
            outfit.outfit_name = name.clone();
        }
        if let Some(outfit_type) = &update.outfit_type {
            outfit.outfit_type = outfit_type.clone();
        }
        if let Some(description) = &update.description {
            outfit.description = description.clone();
        }
        Ok(Some(outfit.clone()))
    }

    async fn delete_outfit(&self, id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.outfits.len();
        tables.outfits.retain(|outfit| outfit.id != id);
        Ok((before - tables.outfits.len()) as u64)
    }

    async fn global_favorites(&self, email: &str) -> StoreResult<Vec<GlobalFavorite>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<&GlobalFavoriteRow> = tables
            .global_favorites
            .iter()
            .filter(|row| row.favorite.email == email)
            .collect();
        newest_first(&mut rows, |row| row.created_at);
        Ok(rows.into_iter().map(|row| row.favorite.clone()).collect())
    }

    async fn global_favorite_exists(&self, favorite: &GlobalFavorite) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.global_favorites.iter().any(|row| row.favorite == *favorite))
    }

    async fn insert_global_favorite(&self, favorite: &GlobalFavorite) -> StoreResult<()> {
        self.tables.lock().await.global_favorites.push(GlobalFavoriteRow {
            favorite: favorite.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_global_favorite(&self, email: &str, task_id: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.global_favorites.len();
        tables
            .global_favorites
            .retain(|row| !(row.favorite.email == email && row.favorite.task_id == task_id));
        Ok((before - tables.global_favorites.len()) as u64)
    }

    async fn is_banned(&self, email: &str) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.bans.iter().any(|ban| ban.email == email))
    }

    async fn banned_emails(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;
        Ok(tables.bans.iter().map(|ban| ban.email.clone()).collect())
    }

    async fn upsert_ban(&self, ban: &BannedUser) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.bans.iter_mut().find(|row| row.email == ban.email) {
            Some(row) => *row = ban.clone(),
            None => tables.bans.push(ban.clone()),
        }
        Ok(())
    }

    async fn delete_ban(&self, email: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.bans.len();
        tables.bans.retain(|ban| ban.email != email);
        Ok((before - tables.bans.len()) as u64)
    }
}
