//! Settings database operations
//!
//! Key/value accessors over the `settings` table.

use dq_common::{Error, Result};
use sqlx::{Pool, Sqlite};

use crate::utils::DEFAULT_MAX_LOCK_WAIT_MS;

pub const AI_BASE_URL_KEY: &str = "ai_base_url";
pub const AI_TOKEN_KEY: &str = "ai_token";
pub const AI_TIMEOUT_MS_KEY: &str = "ai_timeout_ms";
pub const MAX_LOCK_WAIT_MS_KEY: &str = "database_max_lock_wait_ms";

pub async fn get_ai_base_url(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, AI_BASE_URL_KEY).await
}

pub async fn set_ai_base_url(db: &Pool<Sqlite>, url: String) -> Result<()> {
    set_setting(db, AI_BASE_URL_KEY, url).await
}

pub async fn get_ai_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, AI_TOKEN_KEY).await
}

pub async fn set_ai_token(db: &Pool<Sqlite>, token: String) -> Result<()> {
    set_setting(db, AI_TOKEN_KEY, token).await
}

pub async fn get_ai_timeout_ms(db: &Pool<Sqlite>) -> Result<Option<u64>> {
    get_setting::<u64>(db, AI_TIMEOUT_MS_KEY).await
}

/// Upper bound for lock retries; 5000ms when unset
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting::<u64>(db, MAX_LOCK_WAIT_MS_KEY)
        .await
        .map(|v| v.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Generic setting getter
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
