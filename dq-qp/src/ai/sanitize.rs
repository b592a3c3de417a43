//! AI reply cleanup
//!
//! Replies arrive as a JSON object, as `{answer: "<text>"}`, or as bare
//! text, often wrapped in a ```json fence. Cleanup extracts the JSON body,
//! keeps only supported explanation locales and records what it dropped so
//! the step log can show it.

use serde::Serialize;
use serde_json::{Map, Value};

use super::{AiError, AI_RESPONSE_MALFORMED};
use crate::consistency::{primary_locale, SUPPORTED_LOCALES};

/// Cleaned reply fields
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SanitizedReply {
    pub content: Option<String>,
    pub options: Option<Vec<String>>,
    /// Explanation for the requested locale
    pub explanation: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Reply text that held no JSON body
    pub plain_text: Option<String>,
    /// Explanation locales removed as unsupported
    pub stripped_locales: Vec<String>,
}

impl SanitizedReply {
    pub fn require_content(&self) -> Result<&str, AiError> {
        self.content
            .as_deref()
            .ok_or_else(|| AiError::new(AI_RESPONSE_MALFORMED, "AI reply has no content"))
    }

    /// Explanation text, falling back to a plain-text reply
    pub fn explanation_text(&self) -> Option<&str> {
        self.explanation.as_deref().or(self.plain_text.as_deref())
    }
}

/// Body of a ```json fenced block, or the trimmed text when unfenced
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    })
}

/// JSON object carried by a reply, if any
fn reply_object(data: &Value) -> Result<Option<Map<String, Value>>, String> {
    match data {
        Value::Object(obj) => match obj.get("answer") {
            Some(Value::String(answer)) => parse_text_object(answer),
            _ => Ok(Some(obj.clone())),
        },
        Value::String(text) => parse_text_object(text),
        Value::Null => Err("empty reply".to_string()),
        other => Err(format!("unexpected reply type: {}", other)),
    }
}

fn parse_text_object(text: &str) -> Result<Option<Map<String, Value>>, String> {
    match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Object(obj)) => Ok(Some(obj)),
        _ => Ok(None),
    }
}

fn reply_text(data: &Value) -> Option<String> {
    let text = match data {
        Value::String(text) => text.as_str(),
        Value::Object(obj) => obj.get("answer").and_then(Value::as_str)?,
        _ => return None,
    };
    let text = strip_code_fence(text);
    (!text.is_empty()).then(|| text.to_string())
}

/// Clean an AI reply for one target locale
pub fn sanitize_reply(data: &Value, target_locale: &str) -> Result<SanitizedReply, AiError> {
    let object = reply_object(data).map_err(|e| {
        AiError::new(AI_RESPONSE_MALFORMED, format!("AI reply unusable: {}", e)).with_raw(data.clone())
    })?;

    let Some(obj) = object else {
        return Ok(SanitizedReply {
            plain_text: reply_text(data),
            ..Default::default()
        });
    };

    let target = primary_locale(target_locale);
    let mut stripped_locales = Vec::new();
    let explanation = match obj.get("explanation") {
        Some(Value::Object(map)) => {
            let mut chosen = None;
            for (locale, text) in map {
                let primary = primary_locale(locale);
                if !SUPPORTED_LOCALES.contains(&primary.as_str()) {
                    stripped_locales.push(locale.clone());
                    continue;
                }
                if primary == target {
                    chosen = non_blank(Some(text));
                }
            }
            chosen
        }
        other => non_blank(other),
    };
    stripped_locales.sort();

    Ok(SanitizedReply {
        content: non_blank(obj.get("content")),
        options: string_list(obj.get("options")),
        explanation,
        category: non_blank(obj.get("category")),
        tags: string_list(obj.get("tags").or_else(|| obj.get("topic_tags"))).unwrap_or_default(),
        plain_text: None,
        stripped_locales,
    })
}
