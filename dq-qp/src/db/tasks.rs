//! Batch task persistence
//!
//! Counter updates are single `UPDATE ... SET x = x + 1` statements so
//! concurrent workers never lose increments. Status changes are guarded by
//! the expected current status.

use chrono::Utc;
use dq_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{now_rfc3339, parse_optional_timestamp, parse_timestamp, parse_uuid};
use crate::models::{BatchTask, Operation, TaskCounters, TaskOptions, TaskScope, TaskStatus};
use crate::utils::retry_on_lock;

const TASK_COLUMNS: &str = "task_id, status, operations, options, scope, batch_size, \
     continue_on_error, total, processed, succeeded, failed, current_batch, failure_reason, \
     retry_of, created_by, created_at, updated_at, started_at, completed_at";

fn task_from_row(row: &SqliteRow) -> Result<BatchTask> {
    let task_id: String = row.get("task_id");
    let status: String = row.get("status");
    let operations: String = row.get("operations");
    let options: String = row.get("options");
    let scope: String = row.get("scope");
    let retry_of: Option<String> = row.get("retry_of");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let operations: Vec<String> = serde_json::from_str(&operations)?;
    let operations = operations
        .iter()
        .map(|op| {
            Operation::parse(op).ok_or_else(|| Error::Internal(format!("Unknown operation: {}", op)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BatchTask {
        task_id: parse_uuid("task_id", &task_id)?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown task status: {}", status)))?,
        operations,
        options: serde_json::from_str::<TaskOptions>(&options)?,
        scope: serde_json::from_str::<TaskScope>(&scope)?,
        batch_size: row.get::<i64, _>("batch_size").max(1) as u32,
        continue_on_error: row.get::<i64, _>("continue_on_error") != 0,
        counters: TaskCounters {
            total: row.get::<i64, _>("total").max(0) as u64,
            processed: row.get::<i64, _>("processed").max(0) as u64,
            succeeded: row.get::<i64, _>("succeeded").max(0) as u64,
            failed: row.get::<i64, _>("failed").max(0) as u64,
        },
        current_batch: row.get::<i64, _>("current_batch").max(0) as u64,
        failure_reason: row.get("failure_reason"),
        retry_of: retry_of.map(|r| parse_uuid("retry_of", &r)).transpose()?,
        created_by: row.get("created_by"),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        started_at: parse_optional_timestamp("started_at", row.get("started_at"))?,
        completed_at: parse_optional_timestamp("completed_at", row.get("completed_at"))?,
    })
}

/// Insert a new task unless another task is pending or processing
///
/// Check and insert are one statement. Returns false when blocked.
pub async fn insert_task_if_idle(pool: &SqlitePool, task: &BatchTask) -> Result<bool> {
    let operations: Vec<&str> = task.operations.iter().map(|op| op.as_str()).collect();
    let operations = serde_json::to_string(&operations)?;
    let options = serde_json::to_string(&task.options)?;
    let scope = serde_json::to_string(&task.scope)?;

    let result = sqlx::query(
        r#"
        INSERT INTO batch_tasks (
            task_id, status, operations, options, scope, batch_size, continue_on_error,
            total, processed, succeeded, failed, current_batch, failure_reason,
            retry_of, created_by, created_at, updated_at, started_at, completed_at
        )
        SELECT ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 0, NULL, ?, ?, ?, ?, NULL, NULL
        WHERE NOT EXISTS (
            SELECT 1 FROM batch_tasks WHERE status IN ('pending', 'processing')
        )
        "#,
    )
    .bind(task.task_id.to_string())
    .bind(task.status.as_str())
    .bind(operations)
    .bind(options)
    .bind(scope)
    .bind(i64::from(task.batch_size))
    .bind(task.continue_on_error)
    .bind(task.counters.total as i64)
    .bind(task.retry_of.map(|id| id.to_string()))
    .bind(&task.created_by)
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_task(pool: &SqlitePool, task_id: Uuid) -> Result<Option<BatchTask>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batch_tasks WHERE task_id = ?",
        TASK_COLUMNS
    ))
    .bind(task_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Current status only; used for cancellation checks between batches
pub async fn load_status(pool: &SqlitePool, task_id: Uuid) -> Result<Option<TaskStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM batch_tasks WHERE task_id = ?")
        .bind(task_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(status.as_deref().and_then(TaskStatus::parse))
}

/// Newest first
pub async fn list_tasks(
    pool: &SqlitePool,
    status: Option<TaskStatus>,
    limit: u32,
    offset: u64,
) -> Result<Vec<BatchTask>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM batch_tasks WHERE (? IS NULL OR status = ?) \
         ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        TASK_COLUMNS
    ))
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .bind(i64::from(limit))
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(task_from_row).collect()
}

pub async fn has_active_task(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM batch_tasks WHERE status IN ('pending', 'processing')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// `pending → processing` with the resolved scope and its size
pub async fn mark_processing(pool: &SqlitePool, task_id: Uuid, scope: &TaskScope, total: u64) -> Result<bool> {
    let now = now_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE batch_tasks
        SET status = 'processing', scope = ?, total = ?, started_at = ?, updated_at = ?
        WHERE task_id = ? AND status = 'pending'
        "#,
    )
    .bind(serde_json::to_string(scope)?)
    .bind(total as i64)
    .bind(&now)
    .bind(&now)
    .bind(task_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn set_current_batch(pool: &SqlitePool, task_id: Uuid, batch: u64) -> Result<()> {
    sqlx::query("UPDATE batch_tasks SET current_batch = ?, updated_at = ? WHERE task_id = ?")
        .bind(batch as i64)
        .bind(now_rfc3339())
        .bind(task_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Count one finished question
///
/// Returns the counters after the increment. The `processed < total` guard
/// keeps `processed <= total` even if a question is reported twice.
pub async fn record_question_outcome(
    pool: &SqlitePool,
    task_id: Uuid,
    succeeded: bool,
) -> Result<TaskCounters> {
    let max_wait_ms = super::settings::get_max_lock_wait_ms(pool).await?;
    let task_id_str = task_id.to_string();
    let (ok, failed) = if succeeded { (1i64, 0i64) } else { (0, 1) };

    retry_on_lock("record_question_outcome", max_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE batch_tasks
            SET processed = processed + 1,
                succeeded = succeeded + ?,
                failed = failed + ?,
                updated_at = ?
            WHERE task_id = ? AND processed < total
            "#,
        )
        .bind(ok)
        .bind(failed)
        .bind(now_rfc3339())
        .bind(&task_id_str)
        .execute(pool)
        .await?;

        let row = sqlx::query(
            "SELECT total, processed, succeeded, failed FROM batch_tasks WHERE task_id = ?",
        )
        .bind(&task_id_str)
        .fetch_one(pool)
        .await?;

        Ok(TaskCounters {
            total: row.get::<i64, _>("total").max(0) as u64,
            processed: row.get::<i64, _>("processed").max(0) as u64,
            succeeded: row.get::<i64, _>("succeeded").max(0) as u64,
            failed: row.get::<i64, _>("failed").max(0) as u64,
        })
    })
    .await
}

/// Move a non-terminal task to a terminal status
///
/// Returns false when the task was already terminal (for example cancelled
/// while the last batch ran).
pub async fn finish_task(
    pool: &SqlitePool,
    task_id: Uuid,
    status: TaskStatus,
    failure_reason: Option<&str>,
) -> Result<bool> {
    if !status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "finish_task needs a terminal status, got {}",
            status.as_str()
        )));
    }
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE batch_tasks
        SET status = ?, failure_reason = COALESCE(?, failure_reason),
            completed_at = ?, updated_at = ?
        WHERE task_id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(status.as_str())
    .bind(failure_reason)
    .bind(&now)
    .bind(&now)
    .bind(task_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Flip a pending/processing task to cancelled
pub async fn cancel_task(pool: &SqlitePool, task_id: Uuid) -> Result<bool> {
    finish_task(pool, task_id, TaskStatus::Cancelled, None).await
}

/// Cancel tasks a previous process left pending or processing
///
/// Their runner died with the process, so they can never progress.
pub async fn cleanup_stale_tasks(pool: &SqlitePool) -> Result<usize> {
    let now = now_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE batch_tasks
        SET status = 'cancelled',
            failure_reason = 'Task interrupted by service restart',
            completed_at = ?,
            updated_at = ?
        WHERE status IN ('pending', 'processing')
        "#,
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}
