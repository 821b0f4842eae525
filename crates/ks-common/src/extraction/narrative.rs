use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::normalize::collapse_whitespace;

/// 記述セクションの最小文字数。これ未満は目次やラベルの断片とみなす。
pub const SECTION_MIN_CHARS: usize = 30;
/// 1セクションの保持上限。
pub const SECTION_CHAR_CAP: usize = 20_000;

/// 有報の記述ブロック要素名（部分一致、小文字化済み）と日本語セクション名。
const SECTION_ELEMENTS: &[(&str, &str)] = &[
    ("businessrisks", "事業等のリスク"),
    (
        "managementanalysisoffinancialposition",
        "経営者による財政状態、経営成績及びキャッシュ・フローの状況の分析",
    ),
    (
        "analysisoffinancialposition",
        "経営者による財政状態、経営成績及びキャッシュ・フローの状況の分析",
    ),
    ("overviewofbusinessresults", "経営成績等の状況の概要"),
    ("descriptionofbusiness", "事業の内容"),
    ("businesspolicy", "経営方針、経営環境及び対処すべき課題等"),
    ("issuestoaddress", "経営方針、経営環境及び対処すべき課題等"),
    ("researchanddevelopment", "研究開発活動"),
    ("overviewofgroup", "企業集団の状況"),
    ("affiliatedentities", "関係会社の状況"),
    ("criticalcontractsforoperation", "経営上の重要な契約等"),
];

/// 要素ローカル名が記述ブロックに該当すれば日本語セクション名を返す。
pub fn section_name(local_name: &str) -> Option<&'static str> {
    SECTION_ELEMENTS
        .iter()
        .find(|(pattern, _)| local_name.contains(pattern))
        .map(|(_, name)| *name)
}

lazy_static! {
    static ref INLINE_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// TextBlock 内のエスケープ済み HTML からタグを落とし、空白を畳む。
pub fn clean_section_text(raw: &str) -> String {
    let stripped = INLINE_TAG.replace_all(raw, " ");
    let collapsed = collapse_whitespace(&stripped);
    if collapsed.chars().count() <= SECTION_CHAR_CAP {
        return collapsed;
    }
    collapsed.chars().take(SECTION_CHAR_CAP).collect()
}

/// クリーニング済みテキストをセクション表へ登録する。
/// 同名セクションは長い方を残す。短すぎる断片は捨てる。
pub fn register_section(sections: &mut BTreeMap<String, String>, name: &str, raw: &str) {
    let cleaned = clean_section_text(raw);
    if cleaned.chars().count() < SECTION_MIN_CHARS {
        return;
    }

    match sections.get(name) {
        Some(existing) if existing.len() >= cleaned.len() => {}
        _ => {
            sections.insert(name.to_string(), cleaned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_section_elements() {
        assert_eq!(
            section_name("businessriskstextblock"),
            Some("事業等のリスク")
        );
        assert_eq!(
            section_name("researchanddevelopmentactivitiestextblock"),
            Some("研究開発活動")
        );
        assert_eq!(section_name("netsales"), None);
    }

    #[test]
    fn strips_markup_and_collapses_whitespace() {
        let raw = "<p>当社グループは、\n  自動車関連事業を中心に</p><span>事業を展開しています。</span>";
        assert_eq!(
            clean_section_text(raw),
            "当社グループは、 自動車関連事業を中心に 事業を展開しています。"
        );
    }

    #[test]
    fn short_fragments_are_dropped() {
        let mut sections = BTreeMap::new();
        register_section(&mut sections, "事業等のリスク", "リスク");
        assert!(sections.is_empty());
    }

    #[test]
    fn longer_body_replaces_shorter_duplicate() {
        let mut sections = BTreeMap::new();
        let short = "当社の事業に関するリスクは以下のとおりであります。";
        let long = "当社の事業に関するリスクは以下のとおりであります。為替変動、原材料価格の高騰、法規制の変更が挙げられます。";
        register_section(&mut sections, "事業等のリスク", short);
        register_section(&mut sections, "事業等のリスク", long);
        assert_eq!(sections["事業等のリスク"].contains("為替変動"), true);

        // a later, shorter fragment does not clobber the longer body
        register_section(&mut sections, "事業等のリスク", short);
        assert!(sections["事業等のリスク"].contains("為替変動"));
    }
}
