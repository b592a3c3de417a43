//! Configuration resolution for dq-qp
//!
//! The AI collaborator endpoint resolves with Database → ENV → TOML priority.
//! Base URL and token resolve independently so a token kept in the
//! environment can pair with a base URL stored in the database.

use dq_common::config::TomlConfig;
use dq_common::Result;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::client::DEFAULT_TIMEOUT;

/// Environment variable holding the AI base URL
pub const AI_BASE_URL_ENV: &str = "DQ_AI_BASE_URL";
/// Environment variable holding the AI bearer token
pub const AI_TOKEN_ENV: &str = "DQ_AI_TOKEN";

/// Resolved AI collaborator endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiEndpoint {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Resolve the AI endpoint from the three configuration tiers
///
/// Returns `None` when no tier provides a base URL; tasks needing the AI
/// then fail at start.
pub async fn resolve_ai_endpoint(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<AiEndpoint>> {
    let db_url = crate::db::settings::get_ai_base_url(db).await?;
    let env_url = std::env::var(AI_BASE_URL_ENV).ok();
    let toml_url = toml_config.ai_service.base_url.clone();

    let Some(base_url) = pick_tier("AI base URL", db_url, env_url, toml_url) else {
        warn!(
            "AI service not configured. Set {} or [ai_service].base_url; AI operations will fail",
            AI_BASE_URL_ENV
        );
        return Ok(None);
    };

    let db_token = crate::db::settings::get_ai_token(db).await?;
    let env_token = std::env::var(AI_TOKEN_ENV).ok();
    let toml_token = toml_config.ai_service.token.clone();
    let token = pick_tier("AI token", db_token, env_token, toml_token);

    let timeout = match crate::db::settings::get_ai_timeout_ms(db).await? {
        Some(ms) => Duration::from_millis(ms),
        None => toml_config
            .ai_service
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT),
    };

    Ok(Some(AiEndpoint {
        base_url,
        token,
        timeout,
    }))
}

/// First valid value in priority order, warning when several tiers are set
fn pick_tier(
    what: &str,
    database: Option<String>,
    environment: Option<String>,
    toml: Option<String>,
) -> Option<String> {
    let tiers = [("database", database), ("environment", environment), ("TOML", toml)];

    let present: Vec<&str> = tiers
        .iter()
        .filter(|(_, v)| v.as_deref().is_some_and(is_valid_value))
        .map(|(name, _)| *name)
        .collect();

    if present.len() > 1 {
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            what,
            present.join(", "),
            present[0]
        );
    }

    for (name, value) in tiers {
        if let Some(value) = value.filter(|v| is_valid_value(v)) {
            info!("{} loaded from {}", what, name);
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}
