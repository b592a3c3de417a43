//! Answer/explanation comparison

use serde::{Deserialize, Serialize};

use super::{infer_judgement, normalize_truth_value, TruthValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyStatus {
    Consistent,
    Inconsistent,
    Unknown,
}

impl ConsistencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyStatus::Consistent => "consistent",
            ConsistencyStatus::Inconsistent => "inconsistent",
            ConsistencyStatus::Unknown => "unknown",
        }
    }
}

/// Result of comparing expected vs. inferred truth for one (question, locale)
///
/// Computed on demand, never stored on the question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyVerdict {
    pub status: ConsistencyStatus,
    pub expected: TruthValue,
    pub inferred: TruthValue,
    pub locale: Option<String>,
}

impl ConsistencyVerdict {
    /// Build a verdict from two truth values
    ///
    /// `consistent`/`inconsistent` only when both sides are resolved.
    pub fn from_values(expected: TruthValue, inferred: TruthValue, locale: Option<&str>) -> Self {
        let status = if !expected.is_resolved() || !inferred.is_resolved() {
            ConsistencyStatus::Unknown
        } else if expected == inferred {
            ConsistencyStatus::Consistent
        } else {
            ConsistencyStatus::Inconsistent
        };
        Self {
            status,
            expected,
            inferred,
            locale: locale.map(str::to_string),
        }
    }

    pub fn is_inconsistent(&self) -> bool {
        self.status == ConsistencyStatus::Inconsistent
    }
}

/// Check one explanation against the canonical answer token
pub fn check_consistency(
    answer: Option<&str>,
    explanation: Option<&str>,
    locale: Option<&str>,
) -> ConsistencyVerdict {
    let expected = normalize_truth_value(answer);
    let inferred = infer_judgement(explanation, locale);
    ConsistencyVerdict::from_values(expected, inferred, locale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inconsistent_true_answer_false_explanation() {
        let verdict = check_consistency(Some("true"), Some("本题是错误的。"), Some("zh"));
        assert_eq!(verdict.status, ConsistencyStatus::Inconsistent);
        assert_eq!(verdict.expected, TruthValue::True);
        assert_eq!(verdict.inferred, TruthValue::False);
        assert_eq!(verdict.locale.as_deref(), Some("zh"));
    }

    #[test]
    fn test_consistent_when_equal() {
        let verdict = check_consistency(Some("×"), Some("この記述は誤りです。"), Some("ja"));
        assert_eq!(verdict.status, ConsistencyStatus::Consistent);
    }

    #[test]
    fn test_unknown_side_yields_unknown_but_keeps_values() {
        let verdict = check_consistency(Some("maybe"), Some("本题是正确的"), Some("zh"));
        assert_eq!(verdict.status, ConsistencyStatus::Unknown);
        assert_eq!(verdict.expected, TruthValue::Unknown);
        assert_eq!(verdict.inferred, TruthValue::True);

        let verdict = check_consistency(Some("对"), Some("请注意路口标志"), Some("zh"));
        assert_eq!(verdict.status, ConsistencyStatus::Unknown);
        assert_eq!(verdict.expected, TruthValue::True);
    }

    #[test]
    fn test_verdict_serializes_lowercase() {
        let verdict = check_consistency(Some("false"), Some("This statement is true."), Some("en"));
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["status"], "inconsistent");
        assert_eq!(json["expected"], "false");
        assert_eq!(json["inferred"], "true");
        assert_eq!(json["locale"], "en");
    }
}
