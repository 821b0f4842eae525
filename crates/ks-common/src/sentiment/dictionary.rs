use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::normalize::parse_numeric;

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("failed to read dictionary file: {0}")]
    Io(#[from] std::io::Error),
    #[error("dictionary contains no usable rows")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryEntry {
    pub term: String,
    pub score: f64,
}

/// 金融文書向けの既定辞書。単語・複合句・定型の否定表現を含む。
/// スコアは [-1, +1]。
const EMBEDDED: &[(&str, f64)] = &[
    // 基本語（ポジティブ）
    ("増収", 0.6),
    ("増益", 0.7),
    ("増収増益", 0.8),
    ("黒字", 0.5),
    ("黒字転換", 0.8),
    ("黒字化", 0.7),
    ("過去最高", 0.9),
    ("最高益", 0.9),
    ("上方修正", 0.8),
    ("増配", 0.7),
    ("復配", 0.7),
    ("好調", 0.7),
    ("堅調", 0.5),
    ("順調", 0.5),
    ("成長", 0.6),
    ("拡大", 0.4),
    ("伸長", 0.5),
    ("好転", 0.6),
    ("改善", 0.5),
    ("回復", 0.5),
    ("上昇", 0.4),
    ("増加", 0.3),
    ("持ち直し", 0.4),
    ("底打ち", 0.3),
    ("上振れ", 0.6),
    ("受注増", 0.5),
    ("採算改善", 0.6),
    ("需要が旺盛", 0.6),
    ("好調に推移", 0.7),
    ("堅調に推移", 0.6),
    ("収益性の向上", 0.6),
    ("シェア拡大", 0.5),
    ("寄与", 0.3),
    ("貢献", 0.3),
    ("優位性", 0.4),
    ("効率化", 0.3),
    // 基本語（ネガティブ）
    ("減収", -0.6),
    ("減益", -0.7),
    ("減収減益", -0.8),
    ("赤字", -0.7),
    ("営業赤字", -0.8),
    ("最終赤字", -0.9),
    ("赤字転落", -0.9),
    ("下方修正", -0.8),
    ("減配", -0.7),
    ("無配", -0.8),
    ("債務超過", -1.0),
    ("損失", -0.5),
    ("営業損失", -0.6),
    ("特別損失", -0.5),
    ("減損", -0.7),
    ("減損損失", -0.7),
    ("悪化", -0.6),
    ("低迷", -0.6),
    ("不調", -0.6),
    ("軟調", -0.4),
    ("低調", -0.5),
    ("下落", -0.4),
    ("減少", -0.3),
    ("落ち込み", -0.5),
    ("停滞", -0.4),
    ("失速", -0.6),
    ("苦戦", -0.6),
    ("下振れ", -0.6),
    ("未達", -0.6),
    ("遅延", -0.4),
    ("懸念", -0.4),
    ("不透明", -0.4),
    ("厳しい", -0.4),
    ("厳しい状況", -0.6),
    ("圧迫", -0.5),
    ("コスト増", -0.4),
    ("競争激化", -0.5),
    ("需要の低迷", -0.6),
    ("不祥事", -0.8),
    ("訴訟", -0.5),
    ("継続企業の前提に重要な疑義", -1.0),
    // 中立語（頻度集計用）
    ("横ばい", 0.0),
    ("前年並み", 0.0),
    ("据え置き", 0.0),
    // 複合句（遷移を1語として扱う）
    ("減収幅の縮小", 0.3),
    ("赤字幅の縮小", 0.4),
    ("損失の改善", 0.5),
    ("赤字からの黒字転換", 0.8),
    ("無配からの復配", 0.7),
    // 定型の否定表現
    ("成長の加速には至らず", -0.5),
    ("回復には至らず", -0.4),
    ("改善は限定的", -0.3),
];

/// ロード後は不変として扱う感情辞書。走査用に語長降順で保持する。
#[derive(Debug, Clone)]
pub struct SentimentDictionary {
    entries: Vec<DictionaryEntry>,
}

impl SentimentDictionary {
    /// コードに埋め込まれた既定辞書。
    pub fn embedded() -> Self {
        Self::from_pairs(EMBEDDED.iter().map(|(term, score)| (term.to_string(), *score)))
    }

    fn from_pairs(pairs: impl IntoIterator<Item = (String, f64)>) -> Self {
        let mut entries: Vec<DictionaryEntry> = pairs
            .into_iter()
            .map(|(term, score)| DictionaryEntry { term, score })
            .collect();

        // 語長降順・同長は辞書順。長い複合句が先に一致して短い語の誤爆を防ぐ。
        entries.sort_by(|a, b| {
            b.term
                .chars()
                .count()
                .cmp(&a.term.chars().count())
                .then_with(|| a.term.cmp(&b.term))
        });

        Self { entries }
    }

    /// CSV (`word,score`、`#` 行はコメント) を既定辞書へマージして構築する。
    /// ファイル側のエントリが優先される。
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_csv_over_embedded(&content)
    }

    fn parse_csv_over_embedded(content: &str) -> Result<Self, DictionaryError> {
        let mut merged: BTreeMap<String, f64> = EMBEDDED
            .iter()
            .map(|(term, score)| (term.to_string(), *score))
            .collect();

        let mut loaded = 0usize;
        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((term, raw_score)) = trimmed.split_once(',') else {
                warn!(line = line_no + 1, "dictionary row has no score column");
                continue;
            };

            let term = term.trim();
            if term.is_empty() || term.eq_ignore_ascii_case("word") {
                continue;
            }

            let Some(score) = parse_numeric(raw_score) else {
                warn!(line = line_no + 1, term, "dictionary score is not numeric");
                continue;
            };
            if !(-1.0..=1.0).contains(&score) {
                warn!(line = line_no + 1, term, score, "dictionary score out of range");
                continue;
            }

            merged.insert(term.to_string(), score);
            loaded += 1;
        }

        if loaded == 0 {
            return Err(DictionaryError::Empty);
        }

        Ok(Self::from_pairs(merged))
    }

    /// `KS_SENTIMENT_DICTIONARY` があれば読み込み、失敗時は既定辞書に戻す。
    pub fn from_env() -> Self {
        match std::env::var("KS_SENTIMENT_DICTIONARY") {
            Ok(path) => match Self::load_csv(&path) {
                Ok(dictionary) => dictionary,
                Err(err) => {
                    warn!(path = %path, error = %err, "falling back to embedded sentiment dictionary");
                    Self::embedded()
                }
            },
            Err(_) => Self::embedded(),
        }
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn score_of(&self, term: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.term == term)
            .map(|entry| entry.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_dictionary_is_sorted_longest_first() {
        let dict = SentimentDictionary::embedded();
        let lengths: Vec<usize> = dict
            .entries()
            .iter()
            .map(|e| e.term.chars().count())
            .collect();
        assert!(lengths.windows(2).all(|w| w[0] >= w[1]));
        assert!(dict.len() > 50);
    }

    #[test]
    fn embedded_scores_stay_in_range() {
        let dict = SentimentDictionary::embedded();
        assert!(dict
            .entries()
            .iter()
            .all(|e| (-1.0..=1.0).contains(&e.score)));
    }

    #[test]
    fn csv_rows_override_embedded_scores() {
        let csv = "# カスタム辞書\nword,score\n増収,０.９\n独自用語,-0.2\n";
        let dict = SentimentDictionary::parse_csv_over_embedded(csv).unwrap();
        assert_eq!(dict.score_of("増収"), Some(0.9));
        assert_eq!(dict.score_of("独自用語"), Some(-0.2));
        // 既定辞書のエントリは残る
        assert_eq!(dict.score_of("減益"), Some(-0.7));
    }

    #[test]
    fn out_of_range_and_malformed_rows_are_skipped() {
        let csv = "良い,1.5\n悪い,abc\nまとも,-0.4\n";
        let dict = SentimentDictionary::parse_csv_over_embedded(csv).unwrap();
        assert_eq!(dict.score_of("良い"), None);
        assert_eq!(dict.score_of("悪い"), None);
        assert_eq!(dict.score_of("まとも"), Some(-0.4));
    }

    #[test]
    fn csv_without_usable_rows_is_an_error() {
        let csv = "# コメントのみ\nword,score\n";
        assert!(matches!(
            SentimentDictionary::parse_csv_over_embedded(csv),
            Err(DictionaryError::Empty)
        ));
    }

    #[test]
    fn full_width_scores_are_normalized() {
        let csv = "強気,０．５\n";
        let dict = SentimentDictionary::parse_csv_over_embedded(csv).unwrap();
        assert_eq!(dict.score_of("強気"), Some(0.5));
    }
}
