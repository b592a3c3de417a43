//! AI text-generation collaborator
//!
//! The service is a black box behind [`AiCollaborator`]: one request per
//! task item, structured success data or a coded error back. Timeouts and
//! transport failures surface as ordinary [`AiError`]s, never panics.

pub mod cache;
pub mod client;
pub mod sanitize;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use cache::{AnswerCache, CachedAiCollaborator, Clock, ManualClock, SystemClock};
pub use client::HttpAiClient;

pub const AI_SERVICE_TIMEOUT: &str = "AI_SERVICE_TIMEOUT";
pub const AI_SERVICE_NETWORK_ERROR: &str = "AI_SERVICE_NETWORK_ERROR";
pub const AI_SERVICE_HTTP_ERROR: &str = "AI_SERVICE_HTTP_ERROR";
pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
pub const FORBIDDEN: &str = "FORBIDDEN";
pub const AI_RESPONSE_MALFORMED: &str = "AI_RESPONSE_MALFORMED";
pub const AI_NOT_CONFIGURED: &str = "AI_NOT_CONFIGURED";

/// Body of `POST /v1/ask`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRequest {
    pub question: String,
    pub lang: String,
    pub scene: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

/// Successful reply
#[derive(Debug, Clone, PartialEq)]
pub struct AiReply {
    /// Payload to sanitize
    pub data: Value,
    /// Upstream body as received, kept for diagnostics
    pub raw: Value,
}

/// Coded collaborator failure
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct AiError {
    pub code: String,
    pub message: String,
    /// HTTP status when the failure came from a response
    pub status: Option<u16>,
    /// Upstream payload, when there was one
    pub raw: Option<Value>,
}

impl AiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            raw: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

#[async_trait]
pub trait AiCollaborator: Send + Sync {
    async fn ask(&self, request: &AiRequest) -> Result<AiReply, AiError>;
}
