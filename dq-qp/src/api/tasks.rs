//! Batch task API handlers
//!
//! POST /tasks, GET /tasks, GET /tasks/:id, POST /tasks/:id/cancel,
//! POST /tasks/:id/retry, GET /tasks/:id/items, GET /tasks/:id/logs,
//! GET /error-stats

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dq_common::events::DqEvent;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::step_logs::list_step_logs;
use crate::db::task_items::{error_stats, list_items, ErrorStats, ItemFilter, StatsWindow};
use crate::db::tasks::{cancel_task, list_tasks, load_task};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    BatchTask, ItemStatus, Operation, QuestionId, StepCheckpoint, StepLogEntry, TaskCounters,
    TaskItem, TaskOptions, TaskScope, TaskStatus,
};
use crate::tasks::NewTask;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;
const DEFAULT_LOG_LIMIT: u32 = 1000;

/// POST /tasks request
///
/// Omitting `question_ids` selects every question in the store.
#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub operations: Vec<Operation>,
    #[serde(flatten)]
    pub options: TaskOptions,
    #[serde(default)]
    pub question_ids: Option<Vec<QuestionId>>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_continue_on_error() -> bool {
    true
}

/// POST /tasks and POST /tasks/:id/retry response
#[derive(Debug, Serialize)]
pub struct StartTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&BatchTask> for StartTaskResponse {
    fn from(task: &BatchTask) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status,
            retry_of: task.retry_of,
            created_at: task.created_at,
        }
    }
}

/// GET /tasks/:id response, cheap enough to poll
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub operations: Vec<Operation>,
    pub counters: TaskCounters,
    pub current_batch: u64,
    pub batch_size: u32,
    pub continue_on_error: bool,
    pub failure_reason: Option<String>,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<BatchTask> for TaskStatusResponse {
    fn from(task: BatchTask) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status,
            operations: task.operations,
            counters: task.counters,
            current_batch: task.current_batch,
            batch_size: task.batch_size,
            continue_on_error: task.continue_on_error,
            failure_reason: task.failure_reason,
            retry_of: task.retry_of,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

/// POST /tasks/:id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub processed: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryTaskRequest {
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<String>,
    pub operation: Option<String>,
    pub locale: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub step: Option<String>,
    pub limit: Option<u32>,
}

/// Date window shared by the diagnostics endpoints
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub operation: Option<String>,
}

impl WindowQuery {
    pub fn window(&self) -> ApiResult<StatsWindow> {
        Ok(StatsWindow {
            from: self.from,
            to: self.to,
            operation: parse_operation(self.operation.as_deref())?,
        })
    }
}

pub(crate) fn parse_operation(raw: Option<&str>) -> ApiResult<Option<Operation>> {
    raw.map(|s| {
        Operation::parse(s).ok_or_else(|| ApiError::BadRequest(format!("Unknown operation: {}", s)))
    })
    .transpose()
}

fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, MAX_LIST_LIMIT.max(default))
}

/// POST /tasks
///
/// Persists the task and runs it in the background. Returns 202 Accepted.
pub async fn start_task(
    State(state): State<AppState>,
    Json(request): Json<StartTaskRequest>,
) -> ApiResult<(StatusCode, Json<StartTaskResponse>)> {
    let scope = match request.question_ids {
        Some(ids) => TaskScope::questions(ids),
        None => TaskScope::All,
    };

    let task = state
        .orchestrator
        .create_task(NewTask {
            operations: request.operations,
            options: request.options,
            scope,
            batch_size: request.batch_size,
            continue_on_error: request.continue_on_error,
            created_by: request.created_by,
        })
        .await?;

    spawn_task_run(&state, task.task_id).await;
    Ok((StatusCode::ACCEPTED, Json(StartTaskResponse::from(&task))))
}

/// Register a cancellation token and run the task on a background task
async fn spawn_task_run(state: &AppState, task_id: Uuid) {
    let token = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(task_id, token.clone());

    let state_clone = state.clone();
    tokio::spawn(async move {
        tracing::info!(task_id = %task_id, "Background batch task started");

        match state_clone.orchestrator.run(task_id, token).await {
            Ok(status) => {
                tracing::info!(
                    task_id = %task_id,
                    status = status.as_str(),
                    "Background batch task finished"
                );
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Background batch task failed");
                *state_clone.last_error.write().await =
                    Some(format!("Task {} failed: {}", task_id, e));
            }
        }

        state_clone.cancellation_tokens.write().await.remove(&task_id);
    });
}

/// GET /tasks
pub async fn list_task_records(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<TaskStatusResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            TaskStatus::parse(s).ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {}", s)))
        })
        .transpose()?;

    let tasks = list_tasks(
        &state.db,
        status,
        clamp_limit(query.limit, DEFAULT_LIST_LIMIT),
        query.offset.unwrap_or(0),
    )
    .await?;

    Ok(Json(tasks.into_iter().map(TaskStatusResponse::from).collect()))
}

/// GET /tasks/:id
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let task = load_task(&state.db, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {}", task_id)))?;

    tracing::debug!(task_id = %task_id, status = task.status.as_str(), "Status query");
    Ok(Json(task.into()))
}

/// POST /tasks/:id/cancel
///
/// In-flight items finish; no new items start.
pub async fn cancel_task_run(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<CancelTaskResponse>> {
    let task = load_task(&state.db, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {}", task_id)))?;
    if task.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Task already in terminal state: {}",
            task.status.as_str()
        )));
    }

    if !cancel_task(&state.db, task_id).await? {
        return Err(ApiError::Conflict(format!(
            "Task {} finished before it could be cancelled",
            task_id
        )));
    }

    if let Some(token) = state.cancellation_tokens.read().await.get(&task_id) {
        token.cancel();
    }

    let processed = load_task(&state.db, task_id)
        .await?
        .map(|t| t.counters.processed)
        .unwrap_or(task.counters.processed);

    tracing::info!(task_id = %task_id, processed, "Batch task cancelled");
    state.event_bus.emit_lossy(DqEvent::TaskCancelled {
        task_id,
        processed,
        timestamp: Utc::now(),
    });

    Ok(Json(CancelTaskResponse {
        task_id,
        status: TaskStatus::Cancelled,
        processed,
    }))
}

/// POST /tasks/:id/retry
pub async fn retry_task_run(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    request: Option<Json<RetryTaskRequest>>,
) -> ApiResult<(StatusCode, Json<StartTaskResponse>)> {
    let created_by = request.and_then(|Json(r)| r.created_by);
    let task = state.orchestrator.retry_task(task_id, created_by).await?;

    spawn_task_run(&state, task.task_id).await;
    Ok((StatusCode::ACCEPTED, Json(StartTaskResponse::from(&task))))
}

/// GET /tasks/:id/items
pub async fn list_task_items(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ListItemsQuery>,
) -> ApiResult<Json<Vec<TaskItem>>> {
    if load_task(&state.db, task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Task not found: {}", task_id)));
    }

    let filter = ItemFilter {
        status: query
            .status
            .as_deref()
            .map(|s| {
                ItemStatus::parse(s)
                    .ok_or_else(|| ApiError::BadRequest(format!("Unknown item status: {}", s)))
            })
            .transpose()?,
        operation: parse_operation(query.operation.as_deref())?,
        target_locale: query.locale,
    };

    let items = list_items(
        &state.db,
        task_id,
        &filter,
        clamp_limit(query.limit, DEFAULT_LIST_LIMIT),
        query.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(items))
}

/// GET /tasks/:id/logs?step=
pub async fn list_task_logs(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<StepLogEntry>>> {
    let checkpoint = query
        .step
        .as_deref()
        .map(|s| {
            StepCheckpoint::parse(s).ok_or_else(|| ApiError::BadRequest(format!("Unknown step: {}", s)))
        })
        .transpose()?;

    let logs = list_step_logs(
        &state.db,
        task_id,
        checkpoint,
        query.limit.unwrap_or(DEFAULT_LOG_LIMIT).max(1),
    )
    .await?;
    Ok(Json(logs))
}

/// GET /error-stats?from&to&operation
pub async fn get_error_stats(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<ErrorStats>> {
    let stats = error_stats(&state.db, &query.window()?).await?;
    Ok(Json(stats))
}

/// Build batch task routes
pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(start_task).get(list_task_records))
        .route("/tasks/:id", get(get_task_status))
        .route("/tasks/:id/cancel", post(cancel_task_run))
        .route("/tasks/:id/retry", post(retry_task_run))
        .route("/tasks/:id/items", get(list_task_items))
        .route("/tasks/:id/logs", get(list_task_logs))
        .route("/error-stats", get(get_error_stats))
}
