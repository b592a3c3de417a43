//! Explanation stance inference from curated phrase tables
//!
//! Tables favor precision over recall: a false hit can drive an automatic
//! rewrite, a miss only leaves the explanation unchecked.

use super::{primary_locale, TruthValue};

struct PhraseTable {
    locale: &'static str,
    affirmative: &'static [&'static str],
    negative: &'static [&'static str],
}

const PHRASE_TABLES: &[PhraseTable] = &[
    PhraseTable {
        locale: "zh",
        affirmative: &[
            "本题是正确的",
            "该题是正确的",
            "该说法是正确的",
            "此说法正确",
            "上述说法是正确的",
            "说法正确",
            "答案正确",
            "判断正确",
        ],
        negative: &[
            "本题是错误的",
            "该题是错误的",
            "该说法是错误的",
            "此说法错误",
            "上述说法是错误的",
            "说法不正确",
            "答案错误",
            "判断错误",
            "不正确",
        ],
    },
    PhraseTable {
        locale: "ja",
        affirmative: &[
            "この記述は正しいです",
            "この文は正しいです",
            "正しいです",
            "正しいと言えます",
            "正しいといえる",
        ],
        negative: &[
            "この記述は誤りです",
            "この文は誤りです",
            "誤りです",
            "正しくありません",
            "間違いです",
            "誤っています",
        ],
    },
    PhraseTable {
        locale: "en",
        affirmative: &["this statement is true", "this is correct", "is correct"],
        negative: &[
            "this statement is false",
            "this statement is incorrect",
            "this is false",
            "this is incorrect",
            "is not correct",
        ],
    },
];

/// Infer which truth value an explanation argues
///
/// With a locale hint only that locale's table is consulted (an unsupported
/// hint consults none); without one every table is. Hits on both polarities,
/// or on neither, yield `Unknown`.
pub fn infer_judgement(text: Option<&str>, locale_hint: Option<&str>) -> TruthValue {
    let Some(text) = text else {
        return TruthValue::Unknown;
    };
    let haystack = text.trim().to_lowercase();
    if haystack.is_empty() {
        return TruthValue::Unknown;
    }

    let hint = locale_hint
        .map(primary_locale)
        .filter(|l| !l.is_empty());

    let mut affirmative = false;
    let mut negative = false;
    for table in PHRASE_TABLES {
        if let Some(hint) = &hint {
            if table.locale != hint {
                continue;
            }
        }
        affirmative |= table.affirmative.iter().any(|p| haystack.contains(p));
        negative |= table.negative.iter().any(|p| haystack.contains(p));
    }

    match (affirmative, negative) {
        (true, false) => TruthValue::True,
        (false, true) => TruthValue::False,
        _ => TruthValue::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_affirmative_phrase_is_true() {
        assert_eq!(infer_judgement(Some("本题是正确的。"), Some("zh")), TruthValue::True);
        assert_eq!(
            infer_judgement(Some("この記述は正しいです。"), Some("ja")),
            TruthValue::True
        );
        assert_eq!(
            infer_judgement(Some("This statement is true."), Some("en")),
            TruthValue::True
        );
    }

    #[test]
    fn test_only_negative_phrase_is_false() {
        assert_eq!(infer_judgement(Some("本题是错误的。"), Some("zh")), TruthValue::False);
        assert_eq!(infer_judgement(Some("この文は誤りです"), Some("ja")), TruthValue::False);
        assert_eq!(
            infer_judgement(Some("Overall, this is incorrect."), Some("en")),
            TruthValue::False
        );
    }

    #[test]
    fn test_neither_or_both_is_unknown() {
        assert_eq!(
            infer_judgement(Some("驾驶时应保持安全车距。"), Some("zh")),
            TruthValue::Unknown
        );
        assert_eq!(
            infer_judgement(Some("说法正确，但答案错误"), Some("zh")),
            TruthValue::Unknown
        );
        assert_eq!(infer_judgement(Some("  "), None), TruthValue::Unknown);
        assert_eq!(infer_judgement(None, Some("zh")), TruthValue::Unknown);
    }

    #[test]
    fn test_hint_restricts_tables() {
        // English phrase under a Japanese hint is not looked at
        assert_eq!(
            infer_judgement(Some("This statement is false."), Some("ja")),
            TruthValue::Unknown
        );
        assert_eq!(
            infer_judgement(Some("This statement is false."), None),
            TruthValue::False
        );
        assert_eq!(
            infer_judgement(Some("本题是错误的"), Some("zh-CN")),
            TruthValue::False
        );
        assert_eq!(infer_judgement(Some("本题是错误的"), Some("ko")), TruthValue::Unknown);
    }

    #[test]
    fn test_negated_phrase_does_not_read_as_affirmative() {
        assert_eq!(infer_judgement(Some("该说法不正确"), Some("zh")), TruthValue::False);
        assert_eq!(
            infer_judgement(Some("The answer is not correct"), Some("en")),
            TruthValue::False
        );
    }
}
