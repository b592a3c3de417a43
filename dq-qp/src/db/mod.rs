//! Database access for dq-qp
//!
//! Free async functions over a `SqlitePool`. Structured values are stored as
//! JSON text, timestamps as RFC 3339 UTC strings.

pub mod questions;
pub mod reviews;
pub mod settings;
pub mod step_logs;
pub mod task_items;
pub mod tasks;

use chrono::{DateTime, Utc};
use dq_common::{Error, Result};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::models::QuestionId;

pub use questions::SqliteQuestionStore;

/// Bind a question key keeping its SQLite storage class
pub(crate) fn bind_question_id<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    id: &QuestionId,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match id {
        QuestionId::Numeric(n) => query.bind(*n),
        QuestionId::Text(s) => query.bind(s.clone()),
    }
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(field, &v)).transpose()
}

pub(crate) fn parse_optional_json(value: Option<String>) -> Option<serde_json::Value> {
    value.and_then(|v| serde_json::from_str(&v).ok())
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
