//! Closed substitution table for known mistranslated explanations
//!
//! Only the "explanation says false, answer is true" direction is ever
//! corrected automatically. Everything else goes to a reviewer.

use super::{primary_locale, TruthValue};

struct Substitution {
    locale: &'static str,
    /// Casefolded source text without its sentence terminator
    source: &'static str,
    replacement: &'static str,
}

const SUBSTITUTIONS: &[Substitution] = &[
    Substitution { locale: "zh", source: "本题是错误的", replacement: "本题是正确的" },
    Substitution { locale: "zh", source: "该题是错误的", replacement: "该题是正确的" },
    Substitution { locale: "zh", source: "该说法是错误的", replacement: "该说法是正确的" },
    Substitution { locale: "ja", source: "この記述は誤りです", replacement: "この記述は正しいです" },
    Substitution { locale: "ja", source: "この文は誤りです", replacement: "この文は正しいです" },
    Substitution { locale: "en", source: "this statement is false", replacement: "This statement is true." },
];

/// Sentence terminator for a locale
fn terminator(locale: &str) -> &'static str {
    match locale {
        "zh" | "ja" => "。",
        _ => ".",
    }
}

/// Corrected text for an explanation, if the table knows one
///
/// `expected` is the normalized canonical answer. Without a locale every
/// table entry is eligible. A trailing terminator on the source is kept when
/// the replacement lacks one.
pub fn resolve_auto_fix(expected: TruthValue, locale: Option<&str>, text: &str) -> Option<String> {
    if expected != TruthValue::True {
        return None;
    }

    let locale = locale.map(primary_locale);
    let normalized = text.trim().to_lowercase();

    SUBSTITUTIONS
        .iter()
        .filter(|s| locale.as_deref().map_or(true, |l| l == s.locale))
        .find_map(|s| {
            let glyph = terminator(s.locale);
            let (body, had_terminator) = match normalized.strip_suffix(glyph) {
                Some(body) => (body.trim_end(), true),
                None => (normalized.as_str(), false),
            };
            if body != s.source {
                return None;
            }
            let mut fixed = s.replacement.to_string();
            if had_terminator && !fixed.ends_with(glyph) {
                fixed.push_str(glyph);
            }
            Some(fixed)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zh_fix_preserves_terminator() {
        assert_eq!(
            resolve_auto_fix(TruthValue::True, Some("zh"), "本题是错误的。").as_deref(),
            Some("本题是正确的。")
        );
        assert_eq!(
            resolve_auto_fix(TruthValue::True, Some("zh"), "  该说法是错误的 ").as_deref(),
            Some("该说法是正确的")
        );
    }

    #[test]
    fn test_ja_fix() {
        assert_eq!(
            resolve_auto_fix(TruthValue::True, Some("ja"), "この文は誤りです。").as_deref(),
            Some("この文は正しいです。")
        );
    }

    #[test]
    fn test_en_fix_is_case_insensitive() {
        assert_eq!(
            resolve_auto_fix(TruthValue::True, Some("en"), "This statement is FALSE").as_deref(),
            Some("This statement is true.")
        );
        assert_eq!(
            resolve_auto_fix(TruthValue::True, Some("en"), "This statement is false.").as_deref(),
            Some("This statement is true.")
        );
    }

    #[test]
    fn test_never_fixes_towards_false() {
        for text in ["本题是错误的。", "本题是正确的。", "This statement is true.", "anything"] {
            assert_eq!(resolve_auto_fix(TruthValue::False, Some("zh"), text), None);
            assert_eq!(resolve_auto_fix(TruthValue::False, None, text), None);
            assert_eq!(resolve_auto_fix(TruthValue::Unknown, None, text), None);
        }
    }

    #[test]
    fn test_no_table_match_is_none() {
        assert_eq!(
            resolve_auto_fix(TruthValue::True, Some("zh"), "本题是错误的，因为红灯必须停车。"),
            None
        );
        // Locale mismatch
        assert_eq!(resolve_auto_fix(TruthValue::True, Some("en"), "本题是错误的。"), None);
        assert_eq!(
            resolve_auto_fix(TruthValue::True, None, "本题是错误的。").as_deref(),
            Some("本题是正确的。")
        );
    }
}
