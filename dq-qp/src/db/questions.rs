//! Question table operations

use async_trait::async_trait;
use dq_common::{Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{bind_question_id, now_rfc3339};
use crate::models::{set_explanation_locale, Question, QuestionId};
use crate::store::{PageRequest, QuestionStore};
use crate::utils::retry_on_lock;

const QUESTION_COLUMNS: &str = "CAST(id AS TEXT) AS id_text, typeof(id) AS id_type, content_hash, \
     content, options, explanation, correct_answer, category, topic_tags";

fn parse_json_column(value: Option<String>) -> Option<Value> {
    value.map(|v| serde_json::from_str(&v).unwrap_or(Value::String(v)))
}

fn question_from_row(row: &SqliteRow) -> Question {
    let id_text: String = row.get("id_text");
    let id_type: String = row.get("id_type");
    Question {
        id: QuestionId::from_sql_parts(id_text, &id_type),
        content_hash: row.get("content_hash"),
        content: parse_json_column(row.get("content")),
        options: parse_json_column(row.get("options")),
        explanation: row.get("explanation"),
        correct_answer: row.get("correct_answer"),
        category: row.get("category"),
        topic_tags: parse_json_column(row.get("topic_tags")),
    }
}

/// Insert or replace a question
pub async fn upsert_question(pool: &SqlitePool, question: &Question) -> Result<()> {
    let content = question.content.as_ref().map(Value::to_string);
    let options = question.options.as_ref().map(Value::to_string);
    let topic_tags = question.topic_tags.as_ref().map(Value::to_string);

    let query = sqlx::query(
        r#"
        INSERT INTO questions (
            id, content_hash, content, options, explanation,
            correct_answer, category, topic_tags, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            content_hash = excluded.content_hash,
            content = excluded.content,
            options = excluded.options,
            explanation = excluded.explanation,
            correct_answer = excluded.correct_answer,
            category = excluded.category,
            topic_tags = excluded.topic_tags,
            updated_at = excluded.updated_at
        "#,
    );
    bind_question_id(query, &question.id)
        .bind(&question.content_hash)
        .bind(content)
        .bind(options)
        .bind(&question.explanation)
        .bind(&question.correct_answer)
        .bind(&question.category)
        .bind(topic_tags)
        .bind(now_rfc3339())
        .execute(pool)
        .await?;

    Ok(())
}

/// One page of questions in key order
pub async fn fetch_questions_page(
    pool: &SqlitePool,
    request: &PageRequest,
    limit: u32,
) -> Result<Vec<Question>> {
    let rows = match request {
        PageRequest::Start => {
            sqlx::query(&format!(
                "SELECT {} FROM questions ORDER BY id LIMIT ?",
                QUESTION_COLUMNS
            ))
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await?
        }
        PageRequest::After(cursor) => {
            let sql = format!(
                "SELECT {} FROM questions WHERE id > ? ORDER BY id LIMIT ?",
                QUESTION_COLUMNS
            );
            bind_question_id(sqlx::query(&sql), cursor)
                .bind(i64::from(limit))
                .fetch_all(pool)
                .await?
        }
        PageRequest::Offset(offset) => {
            sqlx::query(&format!(
                "SELECT {} FROM questions ORDER BY id LIMIT ? OFFSET ?",
                QUESTION_COLUMNS
            ))
            .bind(i64::from(limit))
            .bind(*offset as i64)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.iter().map(question_from_row).collect())
}

pub async fn load_question(pool: &SqlitePool, id: &QuestionId) -> Result<Option<Question>> {
    let sql = format!("SELECT {} FROM questions WHERE id = ?", QUESTION_COLUMNS);
    let row = bind_question_id(sqlx::query(&sql), id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(question_from_row))
}

/// Every question key in order
pub async fn list_question_ids(pool: &SqlitePool) -> Result<Vec<QuestionId>> {
    let rows = sqlx::query(
        "SELECT CAST(id AS TEXT) AS id_text, typeof(id) AS id_type FROM questions ORDER BY id",
    )
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

pub async fn count_questions(pool: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as u64)
}

/// Replace one locale of the explanation map
///
/// Read and write happen in one transaction; concurrent writers to the same
/// row resolve last-write-wins.
pub async fn write_explanation(
    pool: &SqlitePool,
    id: &QuestionId,
    locale: &str,
    text: &str,
) -> Result<()> {
    let max_wait_ms = super::settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("write_explanation", max_wait_ms, || async {
        let mut tx = pool.begin().await?;

        let current = bind_question_id(
            sqlx::query("SELECT explanation FROM questions WHERE id = ?"),
            id,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = current else {
            return Err(Error::NotFound(format!("Question not found: {}", id)));
        };
        let stored: Option<String> = row.get("explanation");

        let updated = set_explanation_locale(stored.as_deref(), locale, text);
        let query = sqlx::query("UPDATE questions SET explanation = ?, updated_at = ? WHERE id = ?")
            .bind(updated)
            .bind(now_rfc3339());
        bind_question_id(query, id).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Set `locale` inside a JSON locale map column, upgrading a bare value to `{zh: value}`
fn set_json_locale(stored: Option<&Value>, locale: &str, value: Value) -> Value {
    let mut map = match stored {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("zh".to_string(), other.clone());
            map
        }
    };
    map.insert(locale.to_string(), value);
    Value::Object(map)
}

/// Translated fields for one target locale
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationWrite {
    pub content: String,
    pub options: Option<Vec<String>>,
    pub explanation: Option<String>,
}

/// Write a translation into the content, options and explanation maps
pub async fn write_translation(
    pool: &SqlitePool,
    id: &QuestionId,
    locale: &str,
    translation: &TranslationWrite,
) -> Result<()> {
    let max_wait_ms = super::settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("write_translation", max_wait_ms, || async {
        let mut tx = pool.begin().await?;

        let sql = format!("SELECT {} FROM questions WHERE id = ?", QUESTION_COLUMNS);
        let row = bind_question_id(sqlx::query(&sql), id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Question not found: {}", id)))?;
        let question = question_from_row(&row);

        let content = set_json_locale(
            question.content.as_ref(),
            locale,
            Value::String(translation.content.clone()),
        );
        let options = match &translation.options {
            Some(opts) => Some(set_json_locale(
                question.options.as_ref(),
                locale,
                Value::from(opts.clone()),
            )),
            None => question.options.clone(),
        };
        let explanation = match &translation.explanation {
            Some(text) => Some(set_explanation_locale(question.explanation.as_deref(), locale, text)),
            None => question.explanation.clone(),
        };

        let query = sqlx::query(
            "UPDATE questions SET content = ?, options = ?, explanation = ?, updated_at = ? WHERE id = ?",
        )
        .bind(content.to_string())
        .bind(options.map(|o| o.to_string()))
        .bind(explanation)
        .bind(now_rfc3339());
        bind_question_id(query, id).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    })
    .await
}

pub async fn write_category_tags(
    pool: &SqlitePool,
    id: &QuestionId,
    category: &str,
    tags: &[String],
) -> Result<()> {
    let query = sqlx::query(
        "UPDATE questions SET category = ?, topic_tags = ?, updated_at = ? WHERE id = ?",
    )
    .bind(category)
    .bind(Value::from(tags.to_vec()).to_string())
    .bind(now_rfc3339());
    let result = bind_question_id(query, id).execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Question not found: {}", id)));
    }
    Ok(())
}

/// `QuestionStore` over the `questions` table
#[derive(Clone)]
pub struct SqliteQuestionStore {
    pool: SqlitePool,
}

impl SqliteQuestionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl QuestionStore for SqliteQuestionStore {
    async fn fetch_page(&self, request: &PageRequest, limit: u32) -> Result<Vec<Question>> {
        fetch_questions_page(&self.pool, request, limit).await
    }

    async fn load_question(&self, id: &QuestionId) -> Result<Option<Question>> {
        load_question(&self.pool, id).await
    }

    async fn write_explanation(&self, id: &QuestionId, locale: &str, text: &str) -> Result<()> {
        write_explanation(&self.pool, id, locale, text).await
    }

    async fn count_questions(&self) -> Result<u64> {
        count_questions(&self.pool).await
    }
}
