use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\u{3000}]+").unwrap());

/// 数値文字列の正規化（全角数字・全角記号・桁区切り・△▲に対応）
///
/// 戻り値は ASCII の数値表現。パースの可否は呼び出し側の責務。
pub fn normalize_numeric_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut negative = false;

    for (i, ch) in trimmed.chars().enumerate() {
        match ch {
            '△' | '▲' if i == 0 => negative = true,
            '０'..='９' => {
                let digit = (ch as u32 - '０' as u32) as u8;
                out.push((b'0' + digit) as char);
            }
            '－' | '−' | '‐' => out.push('-'),
            '．' => out.push('.'),
            ',' | '，' => {}
            c if c.is_whitespace() => {}
            _ => out.push(ch),
        }
    }

    if negative && !out.starts_with('-') {
        out.insert(0, '-');
    }
    out
}

/// 数値パース。正規化後に数値として不正なら None（0 への丸めはしない）。
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let normalized = normalize_numeric_text(raw);
    if normalized.is_empty() || normalized == "-" {
        return None;
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == '.')
    {
        return None;
    }
    normalized.parse::<f64>().ok()
}

/// Collapse whitespace runs (including full-width spaces) to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    WS_RUN.replace_all(text.trim(), " ").into_owned()
}

/// 文のサンプル重複排除キー（空白・句読点を落として SHA-256 先頭16文字）
pub fn sentence_dedup_key(sentence: &str) -> String {
    let canonical: String = sentence
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '。' | '、' | '！' | '？' | '．' | '，'))
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let bytes = hasher.finalize();
    let mut hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(16);
    hex
}

/// Count characters in the Japanese scripts (hiragana, katakana, CJK ideographs).
pub fn japanese_char_count(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            matches!(c,
                '\u{3041}'..='\u{3096}'
                | '\u{30A1}'..='\u{30FA}'
                | '\u{30FC}'
                | '\u{4E00}'..='\u{9FFF}')
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_full_width_digits() {
        assert_eq!(normalize_numeric_text("１２３４５"), "12345");
        assert_eq!(normalize_numeric_text("１,２３４"), "1234");
    }

    #[test]
    fn triangle_prefix_means_negative() {
        assert_eq!(normalize_numeric_text("△1,234"), "-1234");
        assert_eq!(normalize_numeric_text("▲ ５６７"), "-567");
        assert_eq!(parse_numeric("△1,234"), Some(-1234.0));
    }

    #[test]
    fn full_width_minus_variants() {
        assert_eq!(parse_numeric("－12.5"), Some(-12.5));
        assert_eq!(parse_numeric("−3"), Some(-3.0));
    }

    #[test]
    fn malformed_numerals_stay_none() {
        assert_eq!(parse_numeric("非開示"), None);
        assert_eq!(parse_numeric("12a3"), None);
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("-"), None);
    }

    #[test]
    fn dedup_key_ignores_whitespace_and_punctuation() {
        assert_eq!(
            sentence_dedup_key("増収となりました。"),
            sentence_dedup_key("増収と なりました")
        );
        assert_ne!(
            sentence_dedup_key("増収となりました"),
            sentence_dedup_key("減収となりました")
        );
    }

    #[test]
    fn counts_japanese_script_chars() {
        assert_eq!(japanese_char_count("売上高ABC"), 3);
        assert_eq!(japanese_char_count("abc 123"), 0);
        assert_eq!(japanese_char_count("カーブ"), 3);
    }
}
