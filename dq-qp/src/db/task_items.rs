//! Task item persistence and failure diagnostics

use chrono::{DateTime, Utc};
use dq_common::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use super::{
    bind_question_id, now_rfc3339, parse_optional_json, parse_optional_timestamp,
    parse_timestamp, parse_uuid,
};
use crate::models::{ItemStatus, Operation, QuestionId, TaskItem};
use crate::utils::retry_on_lock;

/// Error code of an `explanation_audit` item that found an inconsistency
pub const EXPLANATION_INCONSISTENT: &str = "EXPLANATION_INCONSISTENT";

const ITEM_COLUMNS: &str = "id, task_id, CAST(question_id AS TEXT) AS question_id_text, \
     typeof(question_id) AS question_id_type, operation, target_locale, status, ai_request, \
     ai_response, error_code, error_stage, error_message, error_detail, created_at, \
     started_at, finished_at";

fn item_from_row(row: &SqliteRow) -> Result<TaskItem> {
    let task_id: String = row.get("task_id");
    let id_type: String = row.get("question_id_type");
    let operation: String = row.get("operation");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(TaskItem {
        id: row.get("id"),
        task_id: parse_uuid("task_id", &task_id)?,
        question_id: QuestionId::from_sql_parts(row.get("question_id_text"), &id_type),
        operation: Operation::parse(&operation)
            .ok_or_else(|| Error::Internal(format!("Unknown operation: {}", operation)))?,
        target_locale: row.get("target_locale"),
        status: ItemStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown item status: {}", status)))?,
        ai_request: parse_optional_json(row.get("ai_request")),
        ai_response: parse_optional_json(row.get("ai_response")),
        error_code: row.get("error_code"),
        error_stage: row.get("error_stage"),
        error_message: row.get("error_message"),
        error_detail: parse_optional_json(row.get("error_detail")),
        created_at: parse_timestamp("created_at", &created_at)?,
        started_at: parse_optional_timestamp("started_at", row.get("started_at"))?,
        finished_at: parse_optional_timestamp("finished_at", row.get("finished_at"))?,
    })
}

/// Record a new item in `pending`
pub async fn create_item(
    pool: &SqlitePool,
    task_id: Uuid,
    question_id: &QuestionId,
    operation: Operation,
    target_locale: Option<&str>,
) -> Result<i64> {
    let query = sqlx::query(
        r#"
        INSERT INTO task_items (task_id, question_id, operation, target_locale, status, created_at)
        VALUES (?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(task_id.to_string());
    let result = bind_question_id(query, question_id)
        .bind(operation.as_str())
        .bind(target_locale)
        .bind(now_rfc3339())
        .execute(pool)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Move an item forward; a backwards or repeated transition is a no-op
///
/// Returns whether the row changed.
pub async fn transition_item(pool: &SqlitePool, item_id: i64, next: ItemStatus) -> Result<bool> {
    let allowed = next.predecessors();
    if allowed.is_empty() {
        return Ok(false);
    }
    let placeholders = vec!["?"; allowed.len()].join(", ");
    let timestamp_column = match next {
        ItemStatus::Processing => "started_at",
        _ => "finished_at",
    };
    let sql = format!(
        "UPDATE task_items SET status = ?, {} = ? WHERE id = ? AND status IN ({})",
        timestamp_column, placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(next.as_str())
        .bind(now_rfc3339())
        .bind(item_id);
    for status in allowed {
        query = query.bind(*status);
    }
    let result = query.execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

pub async fn record_ai_request(pool: &SqlitePool, item_id: i64, request: &Value) -> Result<()> {
    sqlx::query("UPDATE task_items SET ai_request = ? WHERE id = ?")
        .bind(request.to_string())
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_ai_response(pool: &SqlitePool, item_id: i64, response: &Value) -> Result<()> {
    sqlx::query("UPDATE task_items SET ai_response = ? WHERE id = ?")
        .bind(response.to_string())
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Structured failure stored on an item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailureRecord<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub message: &'a str,
    pub detail: Option<&'a Value>,
}

/// Mark an item succeeded
pub async fn complete_item(pool: &SqlitePool, item_id: i64) -> Result<bool> {
    transition_item(pool, item_id, ItemStatus::Succeeded).await
}

/// Mark an item failed with its diagnostics
pub async fn fail_item(pool: &SqlitePool, item_id: i64, failure: &ItemFailureRecord<'_>) -> Result<bool> {
    let max_wait_ms = super::settings::get_max_lock_wait_ms(pool).await?;
    let detail = failure.detail.map(Value::to_string);

    retry_on_lock("fail_item", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE task_items
            SET status = 'failed', error_code = ?, error_stage = ?, error_message = ?,
                error_detail = ?, finished_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(failure.code)
        .bind(failure.stage)
        .bind(failure.message)
        .bind(&detail)
        .bind(now_rfc3339())
        .bind(item_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Item list filters
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub operation: Option<Operation>,
    pub target_locale: Option<String>,
}

pub async fn list_items(
    pool: &SqlitePool,
    task_id: Uuid,
    filter: &ItemFilter,
    limit: u32,
    offset: u64,
) -> Result<Vec<TaskItem>> {
    let status = filter.status.map(|s| s.as_str());
    let operation = filter.operation.map(|o| o.as_str());

    let rows = sqlx::query(&format!(
        "SELECT {} FROM task_items WHERE task_id = ? \
         AND (? IS NULL OR status = ?) \
         AND (? IS NULL OR operation = ?) \
         AND (? IS NULL OR target_locale = ?) \
         ORDER BY id LIMIT ? OFFSET ?",
        ITEM_COLUMNS
    ))
    .bind(task_id.to_string())
    .bind(status)
    .bind(status)
    .bind(operation)
    .bind(operation)
    .bind(&filter.target_locale)
    .bind(&filter.target_locale)
    .bind(i64::from(limit))
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

/// Questions whose every item in the task succeeded
///
/// A question counts only when it has at least `items_per_question` items,
/// so one interrupted before its last operation is not reported as done.
pub async fn succeeded_question_ids(
    pool: &SqlitePool,
    task_id: Uuid,
    items_per_question: u64,
) -> Result<HashSet<QuestionId>> {
    let rows = sqlx::query(
        r#"
        SELECT CAST(question_id AS TEXT) AS id_text, typeof(question_id) AS id_type
        FROM task_items
        WHERE task_id = ?
        GROUP BY question_id
        HAVING SUM(CASE WHEN status = 'succeeded' THEN 0 ELSE 1 END) = 0
           AND COUNT(*) >= ?
        "#,
    )
    .bind(task_id.to_string())
    .bind(items_per_question as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let id_type: String = row.get("id_type");
            QuestionId::from_sql_parts(row.get("id_text"), &id_type)
        })
        .collect())
}

/// Date window and operation filter for diagnostics
#[derive(Debug, Clone, Default)]
pub struct StatsWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub operation: Option<Operation>,
}

impl StatsWindow {
    fn bounds(&self) -> (Option<String>, Option<String>, Option<&'static str>) {
        (
            self.from.map(|d| d.to_rfc3339()),
            self.to.map(|d| d.to_rfc3339()),
            self.operation.map(|o| o.as_str()),
        )
    }
}

const WINDOW_FILTER: &str = "(? IS NULL OR created_at >= ?) AND (? IS NULL OR created_at <= ?) \
     AND (? IS NULL OR operation = ?)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeCount {
    pub code: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocaleFailures {
    pub target_locale: Option<String>,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageCount {
    pub stage: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionFailures {
    pub question_id: QuestionId,
    pub failed: u64,
}

/// Aggregated item failures for the console
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStats {
    pub by_error_code: Vec<CodeCount>,
    pub by_target_locale: Vec<LocaleFailures>,
    pub by_error_stage: Vec<StageCount>,
    pub top_failing_questions: Vec<QuestionFailures>,
}

const TOP_FAILING_LIMIT: i64 = 20;

pub async fn error_stats(pool: &SqlitePool, window: &StatsWindow) -> Result<ErrorStats> {
    let (from, to, operation) = window.bounds();

    let by_code = sqlx::query(&format!(
        "SELECT COALESCE(error_code, error_message, 'UNKNOWN_ERROR') AS code, COUNT(*) AS n \
         FROM task_items WHERE status = 'failed' AND {} \
         GROUP BY code ORDER BY n DESC, code",
        WINDOW_FILTER
    ))
    .bind(&from)
    .bind(&from)
    .bind(&to)
    .bind(&to)
    .bind(operation)
    .bind(operation)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| CodeCount {
        code: row.get("code"),
        count: row.get::<i64, _>("n").max(0) as u64,
    })
    .collect();

    let by_locale = sqlx::query(&format!(
        "SELECT target_locale, \
         SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed, COUNT(*) AS total \
         FROM task_items WHERE {} \
         GROUP BY target_locale ORDER BY failed DESC, target_locale",
        WINDOW_FILTER
    ))
    .bind(&from)
    .bind(&from)
    .bind(&to)
    .bind(&to)
    .bind(operation)
    .bind(operation)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| LocaleFailures {
        target_locale: row.get("target_locale"),
        failed: row.get::<i64, _>("failed").max(0) as u64,
        total: row.get::<i64, _>("total").max(0) as u64,
    })
    .collect();

    let by_stage = sqlx::query(&format!(
        "SELECT COALESCE(error_stage, 'UNKNOWN') AS stage, COUNT(*) AS n \
         FROM task_items WHERE status = 'failed' AND {} \
         GROUP BY stage ORDER BY n DESC, stage",
        WINDOW_FILTER
    ))
    .bind(&from)
    .bind(&from)
    .bind(&to)
    .bind(&to)
    .bind(operation)
    .bind(operation)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| StageCount {
        stage: row.get("stage"),
        count: row.get::<i64, _>("n").max(0) as u64,
    })
    .collect();

    let top_questions = sqlx::query(&format!(
        "SELECT CAST(question_id AS TEXT) AS id_text, typeof(question_id) AS id_type, COUNT(*) AS n \
         FROM task_items WHERE status = 'failed' AND {} \
         GROUP BY question_id ORDER BY n DESC, question_id LIMIT ?",
        WINDOW_FILTER
    ))
    .bind(&from)
    .bind(&from)
    .bind(&to)
    .bind(&to)
    .bind(operation)
    .bind(operation)
    .bind(TOP_FAILING_LIMIT)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        let id_type: String = row.get("id_type");
        QuestionFailures {
            question_id: QuestionId::from_sql_parts(row.get("id_text"), &id_type),
            failed: row.get::<i64, _>("n").max(0) as u64,
        }
    })
    .collect();

    Ok(ErrorStats {
        by_error_code: by_code,
        by_target_locale: by_locale,
        by_error_stage: by_stage,
        top_failing_questions: top_questions,
    })
}

/// One inconsistent (question, locale) found by an `explanation_audit` item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InconsistencyFinding {
    pub task_id: Uuid,
    pub item_id: i64,
    pub question_id: QuestionId,
    pub locale: String,
    pub expected: String,
    pub inferred: String,
    pub source: String,
    pub auto_fixable: bool,
    pub old_text: Option<String>,
    pub suggested_fix: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// CSV header for [`findings_to_csv`]
pub const FINDINGS_CSV_HEADER: [&str; 6] =
    ["question_id", "locale", "expected", "inferred", "source", "auto_fixable"];

pub fn findings_to_csv(findings: &[InconsistencyFinding]) -> String {
    let rows: Vec<Vec<String>> = findings
        .iter()
        .map(|f| {
            vec![
                f.question_id.to_string(),
                f.locale.clone(),
                f.expected.clone(),
                f.inferred.clone(),
                f.source.clone(),
                f.auto_fixable.to_string(),
            ]
        })
        .collect();
    crate::utils::csv::to_csv(&FINDINGS_CSV_HEADER, &rows)
}

/// Expand the `findings` array stored in an audit item's error detail
fn expand_findings(
    task_id: Uuid,
    item_id: i64,
    question_id: &QuestionId,
    created_at: DateTime<Utc>,
    detail: &Value,
) -> Vec<InconsistencyFinding> {
    let Some(entries) = detail.get("findings").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let verdict = entry.get("explanationConsistency")?;
            let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
            Some(InconsistencyFinding {
                task_id,
                item_id,
                question_id: question_id.clone(),
                locale: text(verdict.get("locale")).unwrap_or_default(),
                expected: text(verdict.get("expected")).unwrap_or_default(),
                inferred: text(verdict.get("inferred")).unwrap_or_default(),
                source: text(entry.get("source")).unwrap_or_default(),
                auto_fixable: entry
                    .get("autoFixable")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                old_text: text(entry.get("oldText")),
                suggested_fix: text(entry.get("suggestedFix")),
                created_at,
            })
        })
        .collect()
}

/// Inconsistencies recorded by audit items within a window
pub async fn list_findings(pool: &SqlitePool, window: &StatsWindow) -> Result<Vec<InconsistencyFinding>> {
    let (from, to, operation) = window.bounds();

    let rows = sqlx::query(&format!(
        "SELECT {} FROM task_items WHERE error_code = ? AND {} ORDER BY id",
        ITEM_COLUMNS, WINDOW_FILTER
    ))
    .bind(EXPLANATION_INCONSISTENT)
    .bind(&from)
    .bind(&from)
    .bind(&to)
    .bind(&to)
    .bind(operation)
    .bind(operation)
    .fetch_all(pool)
    .await?;

    let mut findings = Vec::new();
    for row in &rows {
        let item = item_from_row(row)?;
        if let Some(detail) = &item.error_detail {
            findings.extend(expand_findings(
                item.task_id,
                item.id,
                &item.question_id,
                item.created_at,
                detail,
            ));
        }
    }
    Ok(findings)
}
