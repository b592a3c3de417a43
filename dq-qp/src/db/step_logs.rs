//! Structured step logs
//!
//! One row per checkpoint an item passes, so AI-response cleanup can be
//! diagnosed after the fact.

use dq_common::Result;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{now_rfc3339, parse_optional_json, parse_timestamp, parse_uuid};
use crate::models::{QuestionId, StepCheckpoint, StepLogEntry};

/// A step-log row to append
#[derive(Debug, Clone)]
pub struct NewStepLog<'a> {
    pub task_id: Uuid,
    pub item_id: Option<i64>,
    pub question_id: Option<&'a QuestionId>,
    pub operation: Option<&'a str>,
    pub target_locale: Option<&'a str>,
    pub checkpoint: StepCheckpoint,
    pub level: &'a str,
    pub message: &'a str,
    pub payload: Option<&'a Value>,
}

pub async fn append_step_log(pool: &SqlitePool, entry: &NewStepLog<'_>) -> Result<i64> {
    let query = sqlx::query(
        r#"
        INSERT INTO task_step_logs (
            task_id, item_id, question_id, operation, target_locale,
            checkpoint, level, message, payload, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.task_id.to_string())
    .bind(entry.item_id);
    let query = match entry.question_id {
        Some(id) => super::bind_question_id(query, id),
        None => query.bind(None::<String>),
    };
    let result = query
        .bind(entry.operation)
        .bind(entry.target_locale)
        .bind(entry.checkpoint.as_str())
        .bind(entry.level)
        .bind(entry.message)
        .bind(entry.payload.map(Value::to_string))
        .bind(now_rfc3339())
        .execute(pool)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Step logs of a task in write order, optionally one checkpoint only
pub async fn list_step_logs(
    pool: &SqlitePool,
    task_id: Uuid,
    checkpoint: Option<StepCheckpoint>,
    limit: u32,
) -> Result<Vec<StepLogEntry>> {
    let checkpoint = checkpoint.map(|c| c.as_str());
    let rows = sqlx::query(
        r#"
        SELECT id, task_id, item_id,
               CAST(question_id AS TEXT) AS question_id_text, typeof(question_id) AS question_id_type,
               operation, target_locale, checkpoint, level, message, payload, created_at
        FROM task_step_logs
        WHERE task_id = ? AND (? IS NULL OR checkpoint = ?)
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(task_id.to_string())
    .bind(checkpoint)
    .bind(checkpoint)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let task_id: String = row.get("task_id");
            let created_at: String = row.get("created_at");
            let id_text: Option<String> = row.get("question_id_text");
            let id_type: String = row.get("question_id_type");
            Ok(StepLogEntry {
                id: row.get("id"),
                task_id: parse_uuid("task_id", &task_id)?,
                item_id: row.get("item_id"),
                question_id: id_text.map(|t| QuestionId::from_sql_parts(t, &id_type)),
                operation: row.get("operation"),
                target_locale: row.get("target_locale"),
                checkpoint: row.get("checkpoint"),
                level: row.get("level"),
                message: row.get("message"),
                payload: parse_optional_json(row.get("payload")),
                created_at: parse_timestamp("created_at", &created_at)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tasks::insert_task_if_idle;
    use crate::models::{BatchTask, Operation, TaskOptions, TaskScope};
    use dq_common::db::init_in_memory_database;
    use serde_json::json;

    #[tokio::test]
    async fn test_filter_by_checkpoint() {
        let pool = init_in_memory_database().await.unwrap();
        let task = BatchTask::new(vec![Operation::Polish], TaskOptions::default(), TaskScope::All, 1, true);
        insert_task_if_idle(&pool, &task).await.unwrap();

        let qid = QuestionId::Numeric(4);
        let payload = json!({"stripped_locales": ["ko"]});
        for checkpoint in [StepCheckpoint::AiCallBefore, StepCheckpoint::SanitizeAfter] {
            append_step_log(
                &pool,
                &NewStepLog {
                    task_id: task.task_id,
                    item_id: Some(1),
                    question_id: Some(&qid),
                    operation: Some("polish"),
                    target_locale: Some("zh"),
                    checkpoint,
                    level: "info",
                    message: "step",
                    payload: Some(&payload),
                },
            )
            .await
            .unwrap();
        }

        let all = list_step_logs(&pool, task.task_id, None, 100).await.unwrap();
        assert_eq!(all.len(), 2);

        let sanitize = list_step_logs(&pool, task.task_id, Some(StepCheckpoint::SanitizeAfter), 100)
            .await
            .unwrap();
        assert_eq!(sanitize.len(), 1);
        assert_eq!(sanitize[0].checkpoint, "SANITIZE_AFTER");
        assert_eq!(sanitize[0].question_id, Some(qid));
        assert_eq!(sanitize[0].payload.as_ref().unwrap()["stripped_locales"][0], "ko");
    }
}
