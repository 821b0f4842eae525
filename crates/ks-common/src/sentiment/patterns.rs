use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 文脈パターンの族。語単体ではなく遷移表現を拾う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    /// ネガティブ→ポジティブ遷移（例: 営業損失の改善）
    Improvement,
    /// ポジティブ→ネガティブ遷移（例: 成長の鈍化）
    Deterioration,
    /// ポジティブ表現の否定（例: 成長の加速には至らず）
    NegationOfPositive,
    /// ネガティブ表現の否定（例: 悪化には至らず）
    NegationOfNegative,
}

impl PatternFamily {
    pub fn weight(&self) -> f64 {
        match self {
            PatternFamily::Improvement => 0.7,
            PatternFamily::Deterioration => -0.6,
            PatternFamily::NegationOfPositive => -0.4,
            PatternFamily::NegationOfNegative => 0.4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternFamily::Improvement => "improvement",
            PatternFamily::Deterioration => "deterioration",
            PatternFamily::NegationOfPositive => "negation_of_positive",
            PatternFamily::NegationOfNegative => "negation_of_negative",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextMatch {
    pub family: PatternFamily,
    pub matched: String,
}

const NEG_CORE: &str =
    "(?:営業|経常|最終|当期)?(?:赤字|損失|減収|減益|下落|低迷|悪化|不振|債務超過|無配)";
const POS_CORE: &str = "(?:成長|増収|増益|回復|改善|拡大|好調|黒字|伸び)";

pub struct ContextPatterns {
    improvement: Vec<Regex>,
    deterioration: Vec<Regex>,
    negation_of_positive: Vec<Regex>,
    negation_of_negative: Vec<Regex>,
}

static SHARED: Lazy<ContextPatterns> = Lazy::new(ContextPatterns::build);

impl ContextPatterns {
    /// プロセス内で共有する既定パターン集合。
    pub fn shared() -> &'static ContextPatterns {
        &SHARED
    }

    fn build() -> Self {
        let improvement = vec![
            Regex::new(&format!(
                r"{NEG_CORE}(?:幅|基調|傾向)?の?(?:改善|回復|縮小|解消|脱却|克服)"
            ))
            .unwrap(),
            Regex::new(r"無配からの復配").unwrap(),
            Regex::new(r"赤字からの黒字転換").unwrap(),
        ];

        let deterioration = vec![Regex::new(&format!(
            r"{POS_CORE}(?:幅|基調|傾向|ペース)?の?(?:鈍化|頭打ち|一服|陰り|遅れ|足踏み|失速)"
        ))
        .unwrap()];

        let negation_of_positive = vec![Regex::new(&format!(
            r"{POS_CORE}(?:の[\p{{Han}}ぁ-ん]{{1,4}})?(?:には至らず|は期待できない|は見込めない|できておらず|(?:が|を)維持できない)"
        ))
        .unwrap()];

        let negation_of_negative = vec![Regex::new(&format!(
            r"{NEG_CORE}(?:には至らず|は見られず|は限定的|を回避)"
        ))
        .unwrap()];

        Self {
            improvement,
            deterioration,
            negation_of_positive,
            negation_of_negative,
        }
    }

    fn families(&self) -> [(PatternFamily, &[Regex]); 4] {
        [
            (PatternFamily::Improvement, self.improvement.as_slice()),
            (PatternFamily::Deterioration, self.deterioration.as_slice()),
            (
                PatternFamily::NegationOfPositive,
                self.negation_of_positive.as_slice(),
            ),
            (
                PatternFamily::NegationOfNegative,
                self.negation_of_negative.as_slice(),
            ),
        ]
    }

    /// 全族を走査して一致箇所を返す。族ごとの重みは `PatternFamily::weight`。
    pub fn scan(&self, text: &str) -> Vec<ContextMatch> {
        let mut matches = Vec::new();
        for (family, regexes) in self.families() {
            for regex in regexes {
                for found in regex.find_iter(text) {
                    matches.push(ContextMatch {
                        family,
                        matched: found.as_str().to_string(),
                    });
                }
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<ContextMatch> {
        ContextPatterns::shared().scan(text)
    }

    #[test]
    fn improvement_catches_loss_recovery() {
        let matches = scan("営業損失の改善が進んでいます。");
        assert!(matches
            .iter()
            .any(|m| m.family == PatternFamily::Improvement && m.matched == "営業損失の改善"));
    }

    #[test]
    fn improvement_catches_special_forms() {
        assert!(scan("無配からの復配を決定しました。")
            .iter()
            .any(|m| m.family == PatternFamily::Improvement));
        assert!(scan("赤字からの黒字転換を果たしました。")
            .iter()
            .any(|m| m.family == PatternFamily::Improvement));
    }

    #[test]
    fn deterioration_catches_slowdown() {
        let matches = scan("成長の鈍化が見られます。増収ペースの一服感もあります。");
        let hits: Vec<_> = matches
            .iter()
            .filter(|m| m.family == PatternFamily::Deterioration)
            .collect();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn negation_of_positive_catches_shortfall() {
        let matches = scan("成長の加速には至らず、減益となりました。");
        assert!(matches
            .iter()
            .any(|m| m.family == PatternFamily::NegationOfPositive
                && m.matched == "成長の加速には至らず"));
    }

    #[test]
    fn negation_of_negative_is_mildly_positive() {
        let matches = scan("業績の悪化には至らず、底堅く推移しました。");
        assert!(matches
            .iter()
            .any(|m| m.family == PatternFamily::NegationOfNegative));
        assert!(PatternFamily::NegationOfNegative.weight() > 0.0);
    }

    #[test]
    fn family_weights_match_design() {
        assert_eq!(PatternFamily::Improvement.weight(), 0.7);
        assert_eq!(PatternFamily::Deterioration.weight(), -0.6);
        assert_eq!(PatternFamily::NegationOfPositive.weight(), -0.4);
        assert_eq!(PatternFamily::NegationOfNegative.weight(), 0.4);
    }
}
