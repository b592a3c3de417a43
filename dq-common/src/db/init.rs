//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table the
//! question-processing service uses. All statements are idempotent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Default SQLite busy timeout
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    // WAL lets status polling read while the orchestrator writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Single connection so every query sees the same database.
pub async fn init_in_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_questions_table(pool).await?;
    create_batch_tasks_table(pool).await?;
    create_task_items_table(pool).await?;
    create_task_step_logs_table(pool).await?;
    create_review_tables(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Key-value settings (AI endpoint overrides, retry limits)
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Questions
///
/// `id` is declared without a type so integer keys stay integers and text
/// keys stay text; SQLite orders integers before text.
/// `content` and `explanation` hold JSON locale maps (or a bare JSON string).
async fn create_questions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id PRIMARY KEY NOT NULL,
            content_hash TEXT,
            content TEXT,
            options TEXT,
            explanation TEXT,
            correct_answer TEXT,
            category TEXT,
            topic_tags TEXT,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_batch_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_tasks (
            task_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            operations TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '{}',
            scope TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            continue_on_error INTEGER NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            succeeded INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            current_batch INTEGER NOT NULL DEFAULT 0,
            failure_reason TEXT,
            retry_of TEXT,
            created_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batch_tasks_status ON batch_tasks(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_task_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES batch_tasks(task_id) ON DELETE CASCADE,
            question_id NOT NULL,
            operation TEXT NOT NULL,
            target_locale TEXT,
            status TEXT NOT NULL,
            ai_request TEXT,
            ai_response TEXT,
            error_code TEXT,
            error_stage TEXT,
            error_message TEXT,
            error_detail TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_items_task ON task_items(task_id, status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_task_step_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_step_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES batch_tasks(task_id) ON DELETE CASCADE,
            item_id INTEGER,
            question_id,
            operation TEXT,
            target_locale TEXT,
            checkpoint TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_step_logs_task ON task_step_logs(task_id, id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Review candidates and their append-only revisions
///
/// At most one pending candidate per (question, locale).
async fn create_review_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_candidates (
            candidate_id TEXT PRIMARY KEY,
            question_id NOT NULL,
            locale TEXT NOT NULL,
            status TEXT NOT NULL,
            selected_revision_id TEXT,
            reviewer TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            decided_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_review_candidates_pending
        ON review_candidates(question_id, locale)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_revisions (
            revision_id TEXT PRIMARY KEY,
            candidate_id TEXT NOT NULL REFERENCES review_candidates(candidate_id) ON DELETE CASCADE,
            audit_run_id TEXT,
            source TEXT NOT NULL,
            old_text TEXT,
            proposed_text TEXT,
            auto_fixable INTEGER NOT NULL DEFAULT 0,
            verdict TEXT,
            created_at TEXT NOT NULL,
            seq INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_review_revisions_candidate ON review_revisions(candidate_id, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
