//! HTTP client for the AI service

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{
    AiCollaborator, AiError, AiReply, AiRequest, AI_SERVICE_HTTP_ERROR, AI_SERVICE_NETWORK_ERROR,
    AI_SERVICE_TIMEOUT, AUTH_REQUIRED, FORBIDDEN,
};

const USER_AGENT: &str = concat!("dq-qp/", env!("CARGO_PKG_VERSION"));

/// Per-call timeout when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// `POST {base_url}/v1/ask` with a bearer token
pub struct HttpAiClient {
    http_client: reqwest::Client,
    endpoint: String,
    token: String,
    timeout: Duration,
}

impl HttpAiClient {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self, AiError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::new(AI_SERVICE_NETWORK_ERROR, e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: join_url(base_url, "/v1/ask"),
            token,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Join a base URL and a path with exactly one slash between them
fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Map an error status to its code, preferring the upstream `errorCode`
fn status_error_code(status: u16, body: Option<&Value>) -> String {
    if let Some(code) = body.and_then(|b| b.get("errorCode")).and_then(Value::as_str) {
        return code.to_string();
    }
    match status {
        401 => AUTH_REQUIRED.to_string(),
        403 => FORBIDDEN.to_string(),
        _ => AI_SERVICE_HTTP_ERROR.to_string(),
    }
}

/// Interpret a 2xx body
///
/// `{ok, data, message, errorCode}` envelopes are unwrapped; anything else
/// is taken as the success payload itself.
pub fn parse_envelope(body: Value) -> Result<AiReply, AiError> {
    match body.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(AiReply {
            data: body.get("data").cloned().unwrap_or(Value::Null),
            raw: body,
        }),
        Some(false) => {
            let code = body
                .get("errorCode")
                .and_then(Value::as_str)
                .unwrap_or(AI_SERVICE_HTTP_ERROR)
                .to_string();
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("AI service reported failure")
                .to_string();
            Err(AiError::new(code, message).with_raw(body))
        }
        None => Ok(AiReply {
            data: body.clone(),
            raw: body,
        }),
    }
}

#[async_trait]
impl AiCollaborator for HttpAiClient {
    async fn ask(&self, request: &AiRequest) -> Result<AiReply, AiError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            scene = %request.scene,
            lang = %request.lang,
            "Calling AI service"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::new(
                        AI_SERVICE_TIMEOUT,
                        format!("AI service timeout after {} ms", self.timeout.as_millis()),
                    )
                } else {
                    AiError::new(AI_SERVICE_NETWORK_ERROR, e.to_string())
                }
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<Value> = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        if !status.is_success() {
            let message = body
                .as_ref()
                .and_then(|b| b.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "AI service error: {} {}",
                        status.as_u16(),
                        text.chars().take(200).collect::<String>()
                    )
                });
            tracing::warn!(status = status.as_u16(), %message, "AI service call failed");
            let error = AiError::new(status_error_code(status.as_u16(), body.as_ref()), message)
                .with_status(status.as_u16());
            return Err(match body {
                Some(raw) => error.with_raw(raw),
                None => error.with_raw(Value::String(text)),
            });
        }

        parse_envelope(body.unwrap_or(Value::String(text)))
    }
}
