use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};

use studio_common::split_csv;

use super::required;
use crate::aggregate::{scan_activity, UserStats, SCAN_BATCH_SIZE, SCAN_MAX_BATCHES};
use crate::auth::Identity;
use crate::error::{store_failure, ServiceError};
use crate::models::{
    AdminStatsResponse, AdminTaskParams, AdminTasksResponse, AdminUsersResponse, BanRequest,
    BannedUser, DailyCount, EmailParams, Pagination, SuccessResponse,
};
use crate::state::AppState;
use crate::store::{
    clamp_limit, clamp_offset, TaskFilter, TaskOrder, TaskQuery, DEFAULT_ADMIN_LIMIT,
};

const DEFAULT_BAN_REASON: &str = "disabled by administrator";
const DAILY_WINDOW_DAYS: i64 = 7;

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn admin_task_filter(params: &AdminTaskParams) -> TaskFilter {
    TaskFilter {
        owner_email: None,
        task_type: non_empty(params.task_type.clone()),
        task_id: non_empty(params.task_id.clone()),
        emails: params.email.as_deref().map(split_csv).unwrap_or_default(),
        usernames: params.username.as_deref().map(split_csv).unwrap_or_default(),
        prompt: non_empty(params.prompt.clone()),
    }
}

/// All tasks, newest `created_at` first, with the admin browser's filters.
pub async fn list_tasks(
    state: &AppState,
    params: AdminTaskParams,
) -> Result<AdminTasksResponse, ServiceError> {
    let limit = clamp_limit(params.limit.as_deref(), DEFAULT_ADMIN_LIMIT);
    let offset = clamp_offset(params.offset.as_deref());
    let query = TaskQuery {
        filter: admin_task_filter(&params),
        order: TaskOrder::CreatedAtDesc,
        limit,
        offset,
    };
    let page = state
        .store
        .list_tasks(&query)
        .await
        .map_err(store_failure("list admin tasks"))?;
    Ok(AdminTasksResponse {
        tasks: page.tasks,
        pagination: Pagination {
            limit,
            offset,
            total: page.total,
        },
    })
}

/// Every email seen in `generation_tasks`, with activity totals and ban state.
pub async fn users(state: &AppState) -> Result<AdminUsersResponse, ServiceError> {
    let rows = scan_activity(state.store.as_ref(), SCAN_BATCH_SIZE, SCAN_MAX_BATCHES)
        .await
        .map_err(store_failure("scan user activity"))?;
    let mut stats = UserStats::default();
    for row in &rows {
        stats.add(row);
    }

    let banned: HashSet<String> = match state.store.banned_emails().await {
        Ok(emails) => emails.into_iter().map(|email| email.to_lowercase()).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "banned list unavailable, reporting nobody banned");
            HashSet::new()
        }
    };

    let users = stats.into_summaries(&banned);
    let banned_count = users.iter().filter(|user| user.is_banned).count();
    tracing::info!(rows = rows.len(), users = users.len(), banned_count, "user list built");
    Ok(AdminUsersResponse {
        total_users: users.len(),
        banned_count,
        users,
    })
}

/// Dashboard counters; day boundaries are UTC midnights relative to `now`.
pub async fn stats(state: &AppState, now: DateTime<Utc>) -> Result<AdminStatsResponse, ServiceError> {
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now);
    let week_start = today - Duration::days(DAILY_WINDOW_DAYS);
    let store = state.store.as_ref();

    let total_tasks = store
        .count_tasks(None, None)
        .await
        .map_err(store_failure("count tasks"))?;
    let today_tasks = store
        .count_tasks(Some(today), None)
        .await
        .map_err(store_failure("count today tasks"))?;
    let week_tasks = store
        .count_tasks(Some(week_start), None)
        .await
        .map_err(store_failure("count week tasks"))?;
    let active_users = store
        .count_active_emails()
        .await
        .map_err(store_failure("count active users"))?;
    let task_type_distribution: BTreeMap<String, i64> = store
        .task_type_counts()
        .await
        .map_err(store_failure("count task types"))?
        .into_iter()
        .collect();

    let mut daily_stats = Vec::with_capacity(DAILY_WINDOW_DAYS as usize);
    for days_back in (0..DAILY_WINDOW_DAYS).rev() {
        let start = today - Duration::days(days_back);
        let count = store
            .count_tasks(Some(start), Some(start + Duration::days(1)))
            .await
            .map_err(store_failure("count daily tasks"))?;
        daily_stats.push(DailyCount {
            date: start.date_naive(),
            count,
        });
    }

    Ok(AdminStatsResponse {
        total_tasks,
        today_tasks,
        week_tasks,
        active_users,
        task_type_distribution,
        daily_stats,
    })
}

/// Bans a non-admin email; a repeat ban overwrites reason, actor and time.
pub async fn ban(
    state: &AppState,
    admin: &Identity,
    request: BanRequest,
) -> Result<SuccessResponse, ServiceError> {
    let email = required(request.email.as_deref(), "email is required")?;
    if state.admins.is_admin(email) {
        return Err(ServiceError::validation("administrator accounts cannot be banned"));
    }
    let ban = BannedUser {
        email: email.to_lowercase(),
        reason: non_empty(request.reason).unwrap_or_else(|| DEFAULT_BAN_REASON.to_string()),
        banned_by: Some(admin.email.clone()),
        banned_at: Utc::now(),
    };
    state
        .store
        .upsert_ban(&ban)
        .await
        .map_err(store_failure("ban user"))?;
    tracing::info!(email = %ban.email, banned_by = %admin.email, "user banned");
    Ok(SuccessResponse::with_message(format!("user {email} has been banned")))
}

/// Lifts a ban. Unbanning an email that was never banned still succeeds.
pub async fn unban(
    state: &AppState,
    admin: &Identity,
    params: EmailParams,
) -> Result<SuccessResponse, ServiceError> {
    let email = required(params.email.as_deref(), "email is required")?;
    let removed = state
        .store
        .delete_ban(&email.to_lowercase())
        .await
        .map_err(store_failure("unban user"))?;
    tracing::info!(email, removed, unbanned_by = %admin.email, "user unbanned");
    Ok(SuccessResponse::with_message(format!("user {email} has been unbanned")))
}
