use chrono::Utc;

use super::required;
use crate::auth::Identity;
use crate::error::{store_failure, ServiceError};
use crate::models::{
    HistoryDeleteParams, HistoryPagination, HistoryParams, HistoryResponse, NewTask,
    PendingTasksResponse, SuccessResponse, TaskLogRequest, VerifyResponse, STATUS_COMPLETED,
};
use crate::state::AppState;
use crate::store::{clamp_limit, TaskFilter, TaskOrder, TaskQuery, DEFAULT_HISTORY_PAGE_SIZE};

/// Appends one `generation_tasks` row for the caller.
///
/// Missing `email`/`username` come from the identity, a missing `task_time`
/// is now, and `started_at` defaults to `task_time`.
pub async fn log_task(
    state: &AppState,
    user: &Identity,
    payload: TaskLogRequest,
) -> Result<SuccessResponse, ServiceError> {
    let task_id = required(payload.task_id.as_deref(), "task_id and task_type are required")?;
    let task_type = required(payload.task_type.as_deref(), "task_id and task_type are required")?;
    let task_time = payload.task_time.unwrap_or_else(Utc::now);

    let task = NewTask {
        task_id: task_id.to_string(),
        task_type: task_type.to_string(),
        status: payload
            .status
            .filter(|status| !status.trim().is_empty())
            .unwrap_or_else(|| STATUS_COMPLETED.to_string()),
        email: payload.email.or_else(|| Some(user.email.clone())),
        username: payload.username.or_else(|| Some(user.display_name.clone())),
        prompt: payload.prompt,
        input_image_url: payload.input_image_url,
        input_video_url: payload.input_video_url,
        output_image_url: payload.output_image_url,
        output_video_url: payload.output_video_url,
        background_image_url: payload.background_image_url,
        character_id: payload.character_id,
        task_time,
        started_at: payload.started_at.unwrap_or(task_time),
    };
    state
        .store
        .insert_task(&task)
        .await
        .map_err(store_failure("log task"))?;
    tracing::info!(task_id = %task.task_id, task_type = %task.task_type, email = %user.email, "task logged");
    Ok(SuccessResponse::ok())
}

/// The caller's own tasks, newest `task_time` first.
pub async fn history(
    state: &AppState,
    user: &Identity,
    params: HistoryParams,
) -> Result<HistoryResponse, ServiceError> {
    let page = params
        .page
        .as_deref()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(1)
        .max(1);
    let page_size = clamp_limit(params.page_size.as_deref(), DEFAULT_HISTORY_PAGE_SIZE);
    let task_type = params
        .task_type
        .filter(|value| !value.is_empty() && value != "all");

    let query = TaskQuery {
        filter: TaskFilter {
            owner_email: Some(user.email.clone()),
            task_type,
            ..TaskFilter::default()
        },
        order: TaskOrder::TaskTimeDesc,
        limit: page_size,
        offset: (page - 1).saturating_mul(page_size),
    };
    let result = state
        .store
        .list_tasks(&query)
        .await
        .map_err(store_failure("fetch history"))?;

    Ok(HistoryResponse {
        data: result.tasks,
        pagination: HistoryPagination {
            page,
            page_size,
            total: result.total,
            total_pages: (result.total + page_size - 1) / page_size,
        },
    })
}

/// Deletes the caller's rows with the given `task_id`. Rows with the same id
/// logged by someone else are left alone.
pub async fn delete_history(
    state: &AppState,
    user: &Identity,
    params: HistoryDeleteParams,
) -> Result<SuccessResponse, ServiceError> {
    let task_id = required(params.task_id.as_deref(), "taskId is required")?;
    state
        .store
        .find_task(task_id)
        .await
        .map_err(store_failure("find task"))?
        .ok_or_else(|| ServiceError::not_found("task not found"))?;
    let removed = state
        .store
        .delete_owned_tasks(task_id, &user.email)
        .await
        .map_err(store_failure("delete task"))?;
    if removed == 0 {
        return Err(ServiceError::forbidden("not allowed to delete this task"));
    }
    tracing::info!(task_id, removed, email = %user.email, "history entry deleted");
    Ok(SuccessResponse::ok())
}

/// Tasks still in flight (or failed) for the caller.
pub async fn pending(state: &AppState, user: &Identity) -> Result<PendingTasksResponse, ServiceError> {
    let tasks = state
        .store
        .in_flight_tasks(&user.email, None)
        .await
        .map_err(store_failure("fetch pending tasks"))?;
    Ok(PendingTasksResponse {
        count: tasks.len(),
        pending_tasks: tasks,
    })
}

pub fn verify(user: &Identity) -> VerifyResponse {
    VerifyResponse {
        valid: true,
        email: Some(user.email.clone()),
        user_id: Some(user.id.to_string()),
        username: Some(user.display_name.clone()),
    }
}
