//! Explanation/answer consistency
//!
//! Pure functions: the canonical answer is normalized to a tri-state truth
//! value, the explanation's stance is inferred from curated phrase tables,
//! and the two are compared. Known mistranslations can be corrected by a
//! closed substitution table.

pub mod autofix;
pub mod checker;
pub mod judgement;
pub mod truth;

pub use autofix::resolve_auto_fix;
pub use checker::{check_consistency, ConsistencyStatus, ConsistencyVerdict};
pub use judgement::infer_judgement;
pub use truth::{normalize_truth_value, TruthValue};

/// Locales with phrase tables
pub const SUPPORTED_LOCALES: [&str; 3] = ["zh", "ja", "en"];

/// Primary language subtag, lowercased (`zh-CN` → `zh`)
pub fn primary_locale(locale: &str) -> String {
    locale
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_locale() {
        assert_eq!(primary_locale("zh-CN"), "zh");
        assert_eq!(primary_locale(" JA "), "ja");
        assert_eq!(primary_locale("en_US"), "en");
    }
}
