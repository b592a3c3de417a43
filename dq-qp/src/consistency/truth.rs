//! Canonical answer normalization

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state truth value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruthValue {
    True,
    False,
    Unknown,
}

impl TruthValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            TruthValue::True => "true",
            TruthValue::False => "false",
            TruthValue::Unknown => "unknown",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, TruthValue::Unknown)
    }
}

impl fmt::Display for TruthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Affirmative tokens (already casefolded)
pub const AFFIRMATIVE_KEYWORDS: &[&str] = &[
    "对", "正确", "是", "true", "t", "yes", "y", "正しい", "○", "o", "correct",
];

/// Negative tokens (already casefolded)
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "错", "错误", "否", "不是", "false", "f", "no", "n", "誤", "×", "x", "✗", "incorrect",
];

/// Map a raw answer token to a truth value
///
/// Exact membership after trim and casefold. Anything else, including an
/// absent or blank token, is `Unknown`.
pub fn normalize_truth_value(raw: Option<&str>) -> TruthValue {
    let Some(raw) = raw else {
        return TruthValue::Unknown;
    };
    let token = raw.trim().to_lowercase();
    if token.is_empty() {
        return TruthValue::Unknown;
    }

    if AFFIRMATIVE_KEYWORDS.contains(&token.as_str()) {
        TruthValue::True
    } else if NEGATIVE_KEYWORDS.contains(&token.as_str()) {
        TruthValue::False
    } else {
        TruthValue::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_affirmative_keyword_is_true() {
        for keyword in AFFIRMATIVE_KEYWORDS {
            assert_eq!(
                normalize_truth_value(Some(keyword)),
                TruthValue::True,
                "keyword {:?}",
                keyword
            );
        }
    }

    #[test]
    fn test_every_negative_keyword_is_false() {
        for keyword in NEGATIVE_KEYWORDS {
            assert_eq!(
                normalize_truth_value(Some(keyword)),
                TruthValue::False,
                "keyword {:?}",
                keyword
            );
        }
    }

    #[test]
    fn test_keyword_sets_are_disjoint() {
        for keyword in AFFIRMATIVE_KEYWORDS {
            assert!(!NEGATIVE_KEYWORDS.contains(keyword));
        }
    }

    #[test]
    fn test_trim_and_casefold() {
        assert_eq!(normalize_truth_value(Some("  TRUE ")), TruthValue::True);
        assert_eq!(normalize_truth_value(Some("Incorrect")), TruthValue::False);
        assert_eq!(normalize_truth_value(Some("X")), TruthValue::False);
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        assert_eq!(normalize_truth_value(None), TruthValue::Unknown);
        assert_eq!(normalize_truth_value(Some("")), TruthValue::Unknown);
        assert_eq!(normalize_truth_value(Some("   ")), TruthValue::Unknown);
        assert_eq!(normalize_truth_value(Some("truthy")), TruthValue::Unknown);
        assert_eq!(normalize_truth_value(Some("0")), TruthValue::Unknown);
        assert_eq!(normalize_truth_value(Some("正确的")), TruthValue::Unknown);
    }
}
