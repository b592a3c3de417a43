//! Unit tests for database initialization

use dq_common::db::{init_database, init_in_memory_database, CURRENT_SCHEMA_VERSION};
use sqlx::Row;

const EXPECTED_TABLES: [&str; 7] = [
    "batch_tasks",
    "questions",
    "review_candidates",
    "review_revisions",
    "settings",
    "task_items",
    "task_step_logs",
];

#[tokio::test]
async fn test_database_created_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("drivequiz.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists(), "Database file was not created");

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    for table in EXPECTED_TABLES {
        assert!(tables.iter().any(|t| t == table), "missing table {}", table);
    }
}

#[tokio::test]
async fn test_reopening_existing_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("drivequiz.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO settings (key, value) VALUES ('ai_base_url', 'http://ai')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'ai_base_url'")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(value, "http://ai");

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_question_ids_keep_their_storage_class() {
    let pool = init_in_memory_database().await.unwrap();

    sqlx::query("INSERT INTO questions (id, correct_answer) VALUES (2, 'true')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO questions (id, correct_answer) VALUES ('q-abc', 'false')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO questions (id, correct_answer) VALUES (10, 'true')")
        .execute(&pool)
        .await
        .unwrap();

    let rows = sqlx::query("SELECT CAST(id AS TEXT) AS id_text, typeof(id) AS kind FROM questions ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();

    let ids: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r.get::<String, _>("id_text"), r.get::<String, _>("kind")))
        .collect();

    assert_eq!(
        ids,
        vec![
            ("2".to_string(), "integer".to_string()),
            ("10".to_string(), "integer".to_string()),
            ("q-abc".to_string(), "text".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_only_one_pending_candidate_per_question_locale() {
    let pool = init_in_memory_database().await.unwrap();

    let insert = "INSERT INTO review_candidates (candidate_id, question_id, locale, status, created_at, updated_at) \
                  VALUES (?, 7, 'zh', ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')";

    sqlx::query(insert).bind("a").bind("pending").execute(&pool).await.unwrap();
    let duplicate = sqlx::query(insert).bind("b").bind("pending").execute(&pool).await;
    assert!(duplicate.is_err(), "second pending candidate must be rejected");

    // Decided candidates do not block a new pending one
    sqlx::query("UPDATE review_candidates SET status = 'approved' WHERE candidate_id = 'a'")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(insert).bind("c").bind("pending").execute(&pool).await.unwrap();
}
