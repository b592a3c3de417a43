//! AI endpoint resolution tests
//!
//! Tests touching `DQ_AI_BASE_URL` / `DQ_AI_TOKEN` run under #[serial] so
//! environment changes never race.

mod helpers;

use std::time::Duration;

use dq_common::config::{AiServiceConfig, TomlConfig};
use dq_qp::config::{is_valid_value, resolve_ai_endpoint, AI_BASE_URL_ENV, AI_TOKEN_ENV};
use dq_qp::db::settings::{set_ai_base_url, set_ai_token};
use helpers::create_test_db;
use serial_test::serial;

fn toml_with(base_url: Option<&str>, token: Option<&str>, timeout_ms: Option<u64>) -> TomlConfig {
    TomlConfig {
        ai_service: AiServiceConfig {
            base_url: base_url.map(str::to_string),
            token: token.map(str::to_string),
            timeout_ms,
        },
        ..Default::default()
    }
}

fn clear_env() {
    std::env::remove_var(AI_BASE_URL_ENV);
    std::env::remove_var(AI_TOKEN_ENV);
}

#[tokio::test]
#[serial]
async fn test_database_overrides_env_and_toml() {
    clear_env();
    let pool = create_test_db().await;
    set_ai_base_url(&pool, "http://db.local".to_string()).await.unwrap();
    std::env::set_var(AI_BASE_URL_ENV, "http://env.local");

    let toml = toml_with(Some("http://toml.local"), None, None);
    let endpoint = resolve_ai_endpoint(&pool, &toml).await.unwrap().unwrap();
    assert_eq!(endpoint.base_url, "http://db.local");

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_env_overrides_toml() {
    clear_env();
    let pool = create_test_db().await;
    std::env::set_var(AI_BASE_URL_ENV, "http://env.local");

    let toml = toml_with(Some("http://toml.local"), Some("toml-token"), None);
    let endpoint = resolve_ai_endpoint(&pool, &toml).await.unwrap().unwrap();
    assert_eq!(endpoint.base_url, "http://env.local");
    assert_eq!(endpoint.token.as_deref(), Some("toml-token"));

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_token_resolves_independently_of_base_url() {
    clear_env();
    let pool = create_test_db().await;
    set_ai_base_url(&pool, "http://db.local".to_string()).await.unwrap();
    std::env::set_var(AI_TOKEN_ENV, "env-token");

    let endpoint = resolve_ai_endpoint(&pool, &TomlConfig::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(endpoint.base_url, "http://db.local");
    assert_eq!(endpoint.token.as_deref(), Some("env-token"));

    set_ai_token(&pool, "db-token".to_string()).await.unwrap();
    let endpoint = resolve_ai_endpoint(&pool, &TomlConfig::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(endpoint.token.as_deref(), Some("db-token"));

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_unconfigured_endpoint_is_none() {
    clear_env();
    let pool = create_test_db().await;

    let endpoint = resolve_ai_endpoint(&pool, &TomlConfig::default()).await.unwrap();
    assert!(endpoint.is_none());
}

#[tokio::test]
#[serial]
async fn test_whitespace_values_are_skipped() {
    clear_env();
    let pool = create_test_db().await;
    set_ai_base_url(&pool, "   ".to_string()).await.unwrap();
    std::env::set_var(AI_BASE_URL_ENV, "");

    let toml = toml_with(Some("  http://toml.local  "), None, None);
    let endpoint = resolve_ai_endpoint(&pool, &toml).await.unwrap().unwrap();
    assert_eq!(endpoint.base_url, "http://toml.local");
    assert!(endpoint.token.is_none());

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_timeout_defaults_and_overrides() {
    clear_env();
    let pool = create_test_db().await;

    let toml = toml_with(Some("http://toml.local"), None, None);
    let endpoint = resolve_ai_endpoint(&pool, &toml).await.unwrap().unwrap();
    assert_eq!(endpoint.timeout, Duration::from_secs(120));

    let toml = toml_with(Some("http://toml.local"), None, Some(5_000));
    let endpoint = resolve_ai_endpoint(&pool, &toml).await.unwrap().unwrap();
    assert_eq!(endpoint.timeout, Duration::from_millis(5_000));

    sqlx::query("INSERT INTO settings (key, value) VALUES ('ai_timeout_ms', '750')")
        .execute(&pool)
        .await
        .unwrap();
    let endpoint = resolve_ai_endpoint(&pool, &toml).await.unwrap().unwrap();
    assert_eq!(endpoint.timeout, Duration::from_millis(750));
}

#[test]
fn test_is_valid_value() {
    assert!(is_valid_value("http://ai.local"));
    assert!(is_valid_value("  token  "));
    assert!(!is_valid_value(""));
    assert!(!is_valid_value("   \t\n"));
}
