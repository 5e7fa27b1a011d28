//! Per-user activity rollup behind the admin user list.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::models::{ActivityRow, UserSummary};
use crate::store::{Store, StoreResult};

pub const SCAN_BATCH_SIZE: i64 = 1000;
pub const SCAN_MAX_BATCHES: usize = 50;

/// Reads activity rows in fixed batches, newest first. Stops on the first
/// empty batch or after `max_batches`; a full last batch keeps the scan going.
pub async fn scan_activity(
    store: &dyn Store,
    batch_size: i64,
    max_batches: usize,
) -> StoreResult<Vec<ActivityRow>> {
    let mut rows = Vec::new();
    for batch in 0..max_batches {
        let offset = batch as i64 * batch_size;
        let page = store.activity_batch(offset, batch_size).await?;
        tracing::debug!(batch, rows = page.len(), "activity batch read");
        if page.is_empty() {
            return Ok(rows);
        }
        rows.extend(page);
    }
    tracing::warn!(max_batches, "activity scan hit batch cap");
    Ok(rows)
}

#[derive(Debug, Clone)]
struct Accumulator {
    email: String,
    username: Option<(DateTime<Utc>, String)>,
    task_count: u64,
    image_count: u64,
    last_active_at: DateTime<Utc>,
}

/// Folds activity rows into one summary per email. Emails are grouped as
/// stored (case-sensitive); only the ban lookup lower-cases them.
#[derive(Debug, Default)]
pub struct UserStats {
    users: HashMap<String, Accumulator>,
}

impl UserStats {
    pub fn add(&mut self, row: &ActivityRow) {
        let entry = self
            .users
            .entry(row.email.clone())
            .or_insert_with(|| Accumulator {
                email: row.email.clone(),
                username: None,
                task_count: 0,
                image_count: 0,
                last_active_at: row.created_at,
            });
        entry.task_count += 1;
        entry.image_count += count_images_in_output(row.output_image_url.as_deref());
        if row.created_at > entry.last_active_at {
            entry.last_active_at = row.created_at;
        }
        if let Some(name) = row.username.as_deref().filter(|name| !name.is_empty()) {
            let newer = entry
                .username
                .as_ref()
                .map(|(seen_at, _)| row.created_at > *seen_at)
                .unwrap_or(true);
            if newer {
                entry.username = Some((row.created_at, name.to_string()));
            }
        }
    }

    /// Summaries sorted by task count, most active first; ties by email.
    pub fn into_summaries(self, banned: &HashSet<String>) -> Vec<UserSummary> {
        let mut users: Vec<UserSummary> = self
            .users
            .into_values()
            .map(|acc| UserSummary {
                username: acc
                    .username
                    .map(|(_, name)| name)
                    .unwrap_or_else(|| email_local_part(&acc.email).to_string()),
                is_banned: banned.contains(&acc.email.to_lowercase()),
                task_count: acc.task_count,
                image_count: acc.image_count,
                last_active_at: acc.last_active_at,
                email: acc.email,
            })
            .collect();
        users.sort_by(|a, b| {
            b.task_count
                .cmp(&a.task_count)
                .then_with(|| a.email.cmp(&b.email))
        });
        users
    }
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Number of images recorded in an `output_image_url` column.
///
/// The column holds a single URL, a comma-separated URL list, or JSON (an
/// array, or an object carrying `snapshots`, `images` or `urls`).
pub fn count_images_in_output(output: Option<&str>) -> u64 {
    let Some(raw) = output.filter(|raw| !raw.is_empty()) else {
        return 0;
    };
    let count_truthy = |items: &Vec<Value>| items.iter().filter(|item| is_truthy(item)).count() as u64;

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => count_truthy(&items),
        Ok(Value::Object(fields)) => ["snapshots", "images", "urls"]
            .iter()
            .find_map(|key| match fields.get(*key) {
                Some(Value::Array(items)) => Some(count_truthy(items)),
                _ => None,
            })
            .unwrap_or(1),
        Ok(_) => 1,
        Err(_) if raw.contains(',') && raw.contains("http") => raw
            .split(',')
            .filter(|part| part.trim().starts_with("http"))
            .count() as u64,
        Err(_) => u64::from(raw.starts_with("http") || raw.starts_with("data:")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testing::{base_time, task};
    use chrono::Duration;

    fn row(email: &str, minutes: i64, username: Option<&str>) -> ActivityRow {
        ActivityRow {
            email: email.to_string(),
            username: username.map(str::to_string),
            created_at: base_time() + Duration::minutes(minutes),
            output_image_url: None,
        }
    }

    #[test]
    fn image_counts_follow_storage_formats() {
        assert_eq!(count_images_in_output(None), 0);
        assert_eq!(count_images_in_output(Some("")), 0);
        assert_eq!(count_images_in_output(Some(r#"["a", "", null, "b"]"#)), 2);
        assert_eq!(count_images_in_output(Some(r#"{"snapshots": ["a", "b", "c"]}"#)), 3);
        assert_eq!(count_images_in_output(Some(r#"{"urls": ["a"]}"#)), 1);
        assert_eq!(count_images_in_output(Some(r#"{"other": 1}"#)), 1);
        assert_eq!(count_images_in_output(Some("https://a/1.png, https://a/2.png,junk")), 2);
        assert_eq!(count_images_in_output(Some("https://a/1.png")), 1);
        assert_eq!(count_images_in_output(Some("data:image/png;base64,AAA")), 1);
        assert_eq!(count_images_in_output(Some("not a url")), 0);
    }

    #[test]
    fn counts_and_last_active_match_rows_regardless_of_order() {
        let rows = vec![
            row("a@x.com", 5, None),
            row("b@x.com", 9, None),
            row("a@x.com", 30, None),
            row("b@x.com", 1, None),
            row("a@x.com", 12, None),
        ];
        let mut stats = UserStats::default();
        for row in &rows {
            stats.add(row);
        }
        let users = stats.into_summaries(&HashSet::new());
        assert_eq!(users[0].email, "a@x.com");
        assert_eq!(users[0].task_count, 3);
        assert_eq!(users[0].last_active_at, base_time() + Duration::minutes(30));
        assert_eq!(users[1].task_count, 2);
        assert_eq!(users[1].last_active_at, base_time() + Duration::minutes(9));
    }

    #[test]
    fn newest_username_wins_and_local_part_is_fallback() {
        let mut stats = UserStats::default();
        stats.add(&row("a@x.com", 1, Some("old")));
        stats.add(&row("a@x.com", 9, Some("new")));
        stats.add(&row("a@x.com", 5, Some("middle")));
        stats.add(&row("a@x.com", 20, None));
        stats.add(&row("Bob@x.com", 3, None));
        let banned: HashSet<String> = ["bob@x.com".to_string()].into();
        let users = stats.into_summaries(&banned);
        assert_eq!(users[0].username, "new");
        assert!(!users[0].is_banned);
        assert_eq!(users[1].username, "Bob");
        assert!(users[1].is_banned);
    }

    #[test]
    fn emails_differing_in_case_stay_separate_but_share_a_ban() {
        let mut stats = UserStats::default();
        stats.add(&row("Ann@x.com", 1, None));
        stats.add(&row("ann@x.com", 2, None));
        stats.add(&row("ann@x.com", 3, None));
        let banned: HashSet<String> = ["ann@x.com".to_string()].into();
        let users = stats.into_summaries(&banned);
        let summary: Vec<(&str, u64, bool)> = users
            .iter()
            .map(|user| (user.email.as_str(), user.task_count, user.is_banned))
            .collect();
        assert_eq!(summary, vec![("ann@x.com", 2, true), ("Ann@x.com", 1, true)]);
    }

    #[tokio::test]
    async fn exactly_full_batch_keeps_scanning() {
        let store = MemoryStore::new();
        for minute in 0..4 {
            store.seed_task(task(&format!("t{minute}"), "a@x.com", minute)).await;
        }
        let rows = scan_activity(&store, 2, 50).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].created_at, base_time() + Duration::minutes(3));
    }

    #[tokio::test]
    async fn batch_cap_bounds_the_scan() {
        let store = MemoryStore::new();
        for minute in 0..10 {
            store.seed_task(task(&format!("t{minute}"), "a@x.com", minute)).await;
        }
        let rows = scan_activity(&store, 2, 3).await.unwrap();
        assert_eq!(rows.len(), 6);
    }
}
