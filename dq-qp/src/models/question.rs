//! Question records as stored in the `questions` table

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Locale used when an explanation is stored as a bare string
pub const IMPLICIT_EXPLANATION_LOCALE: &str = "zh";

/// Locale → explanation text
pub type ExplanationMap = BTreeMap<String, String>;

/// Question key
///
/// The store accepts integer and text keys in the same column. Ordering
/// matches SQLite's comparison of mixed values: every integer sorts before
/// every text key, integers numerically, text by bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Numeric(i64),
    Text(String),
}

impl QuestionId {
    /// Parse a key received as text (URL path, CLI, CSV)
    ///
    /// Anything that parses as i64 is numeric.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(n) => QuestionId::Numeric(n),
            Err(_) => QuestionId::Text(trimmed.to_string()),
        }
    }

    /// Rebuild a key from `CAST(id AS TEXT)` and `typeof(id)`
    pub fn from_sql_parts(text: String, sql_type: &str) -> Self {
        if sql_type == "integer" {
            if let Ok(n) = text.parse::<i64>() {
                return QuestionId::Numeric(n);
            }
        }
        QuestionId::Text(text)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, QuestionId::Numeric(_))
    }
}

impl Ord for QuestionId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (QuestionId::Numeric(a), QuestionId::Numeric(b)) => a.cmp(b),
            (QuestionId::Numeric(_), QuestionId::Text(_)) => Ordering::Less,
            (QuestionId::Text(_), QuestionId::Numeric(_)) => Ordering::Greater,
            (QuestionId::Text(a), QuestionId::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
        }
    }
}

impl PartialOrd for QuestionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Numeric(n) => write!(f, "{}", n),
            QuestionId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for QuestionId {
    fn from(n: i64) -> Self {
        QuestionId::Numeric(n)
    }
}

impl From<&str> for QuestionId {
    fn from(s: &str) -> Self {
        QuestionId::Text(s.to_string())
    }
}

/// A question row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub content_hash: Option<String>,
    /// Locale → question text, or a bare string
    pub content: Option<Value>,
    pub options: Option<Value>,
    /// Raw stored explanation (JSON locale map, JSON string, or plain text)
    pub explanation: Option<String>,
    /// Raw stored canonical answer
    pub correct_answer: Option<String>,
    pub category: Option<String>,
    pub topic_tags: Option<Value>,
}

impl Question {
    /// Minimal question with an answer and a raw explanation
    pub fn new(id: impl Into<QuestionId>, correct_answer: Option<&str>, explanation: Option<&str>) -> Self {
        Self {
            id: id.into(),
            content_hash: None,
            content: None,
            options: None,
            explanation: explanation.map(str::to_string),
            correct_answer: correct_answer.map(str::to_string),
            category: None,
            topic_tags: None,
        }
    }

    pub fn explanations(&self) -> ExplanationMap {
        decode_explanation(self.explanation.as_deref())
    }

    pub fn answer_token(&self) -> Option<String> {
        raw_answer_token(self.correct_answer.as_deref())
    }

    /// Question text for one locale, falling back to `zh` then any locale
    pub fn content_text(&self, locale: &str) -> Option<String> {
        match self.content.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get(locale)
                .or_else(|| map.get(IMPLICIT_EXPLANATION_LOCALE))
                .or_else(|| map.values().next())
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
    }
}

/// Unwrap a stored canonical answer into the raw token
///
/// The column may hold a bare token (`对`) or a JSON scalar (`"true"`,
/// `true`, `1`).
pub fn raw_answer_token(stored: Option<&str>) -> Option<String> {
    let stored = stored?;
    match serde_json::from_str::<Value>(stored) {
        Ok(Value::String(s)) => Some(s),
        Ok(Value::Bool(b)) => Some(b.to_string()),
        Ok(Value::Number(n)) => Some(n.to_string()),
        Ok(Value::Null) => None,
        _ => Some(stored.to_string()),
    }
}

/// Decode a stored explanation into a locale map
///
/// Object values that are not strings are skipped. A bare string, JSON or
/// not, becomes a single `zh` entry.
pub fn decode_explanation(stored: Option<&str>) -> ExplanationMap {
    let mut map = ExplanationMap::new();
    let Some(stored) = stored else {
        return map;
    };
    if stored.trim().is_empty() {
        return map;
    }

    match serde_json::from_str::<Value>(stored) {
        Ok(Value::Object(obj)) => {
            for (locale, value) in obj {
                if let Value::String(text) = value {
                    map.insert(locale, text);
                }
            }
        }
        Ok(Value::String(text)) => {
            map.insert(IMPLICIT_EXPLANATION_LOCALE.to_string(), text);
        }
        Ok(_) => {}
        Err(_) => {
            map.insert(IMPLICIT_EXPLANATION_LOCALE.to_string(), stored.to_string());
        }
    }
    map
}

/// Replace one locale entry of a stored explanation
///
/// Non-string entries of an existing object survive the rewrite; a bare
/// string is upgraded to a map first.
pub fn set_explanation_locale(stored: Option<&str>, locale: &str, text: &str) -> String {
    let mut obj = match stored.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(obj))) => obj,
        _ => decode_explanation(stored)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    };
    obj.insert(locale.to_string(), Value::String(text.to_string()));
    Value::Object(obj).to_string()
}
