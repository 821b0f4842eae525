use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::normalize::{collapse_whitespace, japanese_char_count, sentence_dedup_key};

use super::dictionary::SentimentDictionary;
use super::patterns::{ContextPatterns, PatternFamily};

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

/// 一致の出所。辞書語か、文脈パターンのどの族か。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Dictionary,
    Improvement,
    Deterioration,
    NegationOfPositive,
    NegationOfNegative,
}

impl From<PatternFamily> for MatchSource {
    fn from(family: PatternFamily) -> Self {
        match family {
            PatternFamily::Improvement => MatchSource::Improvement,
            PatternFamily::Deterioration => MatchSource::Deterioration,
            PatternFamily::NegationOfPositive => MatchSource::NegationOfPositive,
            PatternFamily::NegationOfNegative => MatchSource::NegationOfNegative,
        }
    }
}

/// 1語（または1パターン）の寄与。`weight` は頻度補正後の実効重み。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermContribution {
    pub term: String,
    pub base_score: f64,
    pub count: usize,
    pub weight: f64,
    pub source: MatchSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceHighlight {
    pub sentence: String,
    pub score: f64,
    pub label: SentimentLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSentiment {
    pub section: String,
    pub score: f64,
    pub label: SentimentLabel,
    pub match_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyTable {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub score: f64,
    pub label: SentimentLabel,
    pub contributions: Vec<TermContribution>,
    pub top_positive: Vec<TermContribution>,
    pub top_negative: Vec<TermContribution>,
    pub sections: Vec<SectionSentiment>,
    pub highlights: Vec<SentenceHighlight>,
    pub frequencies: FrequencyTable,
    pub analyzed_chars: usize,
}

impl SentimentAnalysis {
    /// 入力が空・短すぎるときの中立結果。
    pub fn neutral_empty() -> Self {
        Self {
            score: 0.0,
            label: SentimentLabel::Neutral,
            contributions: Vec::new(),
            top_positive: Vec::new(),
            top_negative: Vec::new(),
            sections: Vec::new(),
            highlights: Vec::new(),
            frequencies: FrequencyTable::default(),
            analyzed_chars: 0,
        }
    }

    pub fn match_count(&self) -> usize {
        self.contributions.iter().map(|c| c.count).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SentimentConfig {
    pub positive_threshold: f64,
    pub negative_threshold: f64,
    pub occurrence_cap: usize,
    pub top_terms: usize,
    pub max_highlights: usize,
    pub min_text_chars: usize,
    pub min_sentence_chars: usize,
    pub min_japanese_chars: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            positive_threshold: 0.15,
            negative_threshold: -0.15,
            occurrence_cap: 10,
            top_terms: 10,
            max_highlights: 5,
            min_text_chars: 5,
            min_sentence_chars: 10,
            min_japanese_chars: 3,
        }
    }
}

/// 辞書と文脈パターンを1パスで併用するハイブリッド・スコアラ。
///
/// 文脈一致と辞書一致は別々の母集団として集計し、双方を同じ頻度補正
/// （`base × (1 + 0.5·ln(n))`）にかけた上で統合する。
pub struct SentimentEngine<'a> {
    dictionary: &'a SentimentDictionary,
    patterns: &'static ContextPatterns,
    config: SentimentConfig,
    compound_joiners: Vec<(Regex, String)>,
}

impl<'a> SentimentEngine<'a> {
    pub fn new(dictionary: &'a SentimentDictionary, config: SentimentConfig) -> Self {
        // 複合句がインライン要素や改行で分断されていても拾えるよう、
        // クリーンアップ前に構成文字間の空白を許した形で連結し直す。
        let compound_joiners = dictionary
            .entries()
            .iter()
            .filter(|entry| entry.term.chars().count() >= 4)
            .filter_map(|entry| {
                let pattern: String = entry
                    .term
                    .chars()
                    .map(|c| regex::escape(&c.to_string()))
                    .collect::<Vec<_>>()
                    .join(r"\s*");
                Regex::new(&pattern)
                    .ok()
                    .map(|regex| (regex, entry.term.clone()))
            })
            .collect();

        Self {
            dictionary,
            patterns: ContextPatterns::shared(),
            config,
            compound_joiners,
        }
    }

    pub fn with_default_config(dictionary: &'a SentimentDictionary) -> Self {
        Self::new(dictionary, SentimentConfig::default())
    }

    /// 単一テキストの解析。
    pub fn analyze(&self, text: &str) -> SentimentAnalysis {
        let prepared = self.preprocess(text);
        if prepared.chars().count() < self.config.min_text_chars {
            return SentimentAnalysis::neutral_empty();
        }

        let contributions = self.collect_contributions(&prepared);
        let highlights = self.collect_highlights(&prepared);
        self.build_analysis(contributions, Vec::new(), highlights, prepared.chars().count())
    }

    /// セクション名→本文の集合を解析し、全セクション統合のスコアを返す。
    pub fn analyze_sections(&self, sections: &BTreeMap<String, String>) -> SentimentAnalysis {
        let mut merged: BTreeMap<(String, MatchSource), (f64, usize)> = BTreeMap::new();
        let mut section_results = Vec::new();
        let mut highlights = Vec::new();
        let mut total_chars = 0usize;

        for (name, body) in sections {
            let prepared = self.preprocess(body);
            if prepared.chars().count() < self.config.min_text_chars {
                continue;
            }
            total_chars += prepared.chars().count();

            let contributions = self.collect_contributions(&prepared);
            let (score, _) = self.aggregate(&contributions);
            section_results.push(SectionSentiment {
                section: name.clone(),
                score,
                label: self.label_for(score),
                match_count: contributions.iter().map(|c| c.count).sum(),
            });

            for contribution in contributions {
                let entry = merged
                    .entry((contribution.term.clone(), contribution.source))
                    .or_insert((contribution.base_score, 0));
                entry.1 += contribution.count;
            }

            highlights.extend(self.collect_highlights(&prepared));
        }

        if total_chars == 0 {
            return SentimentAnalysis::neutral_empty();
        }

        let combined: Vec<TermContribution> = merged
            .into_iter()
            .map(|((term, source), (base_score, count))| {
                let count = count.min(self.config.occurrence_cap);
                TermContribution {
                    weight: self.effective_weight(base_score, count),
                    term,
                    base_score,
                    count,
                    source,
                }
            })
            .collect();

        // セクション横断でのサンプル文重複を正規化キーで除去する。
        let mut seen = std::collections::BTreeSet::new();
        highlights.retain(|h| seen.insert(sentence_dedup_key(&h.sentence)));
        highlights.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        highlights.truncate(self.config.max_highlights);

        self.build_analysis(combined, section_results, highlights, total_chars)
    }

    fn build_analysis(
        &self,
        contributions: Vec<TermContribution>,
        sections: Vec<SectionSentiment>,
        highlights: Vec<SentenceHighlight>,
        analyzed_chars: usize,
    ) -> SentimentAnalysis {
        let (score, frequencies) = self.aggregate(&contributions);

        let mut sorted = contributions;
        sorted.sort_by(|a, b| {
            b.weight
                .abs()
                .partial_cmp(&a.weight.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top_positive: Vec<TermContribution> = sorted
            .iter()
            .filter(|c| c.weight > 0.0)
            .take(self.config.top_terms)
            .cloned()
            .collect();
        let top_negative: Vec<TermContribution> = sorted
            .iter()
            .filter(|c| c.weight < 0.0)
            .take(self.config.top_terms)
            .cloned()
            .collect();

        SentimentAnalysis {
            score,
            label: self.label_for(score),
            contributions: sorted,
            top_positive,
            top_negative,
            sections,
            highlights,
            frequencies,
            analyzed_chars,
        }
    }

    /// 前処理: マークアップ除去 → 複合句の連結保護 → 空白正規化。
    fn preprocess(&self, text: &str) -> String {
        let stripped = MARKUP.replace_all(text, " ");
        let mut protected = stripped.into_owned();
        for (regex, canonical) in &self.compound_joiners {
            protected = regex.replace_all(&protected, canonical.as_str()).into_owned();
        }
        collapse_whitespace(&protected)
    }

    fn effective_weight(&self, base: f64, count: usize) -> f64 {
        if count == 0 {
            return 0.0;
        }
        base * (1.0 + 0.5 * (count.min(self.config.occurrence_cap) as f64).ln())
    }

    /// 文脈パターン走査 + 語長降順の非重複辞書走査。
    fn collect_contributions(&self, text: &str) -> Vec<TermContribution> {
        let mut grouped: BTreeMap<(String, MatchSource), (f64, usize)> = BTreeMap::new();

        for context_match in self.patterns.scan(text) {
            let source = MatchSource::from(context_match.family);
            let entry = grouped
                .entry((context_match.matched, source))
                .or_insert((context_match.family.weight(), 0));
            entry.1 += 1;
        }

        let mut occupied = vec![false; text.len()];
        for entry in self.dictionary.entries() {
            let mut count = 0usize;
            for (start, matched) in text.match_indices(entry.term.as_str()) {
                let end = start + matched.len();
                if occupied[start..end].iter().any(|taken| *taken) {
                    continue;
                }
                occupied[start..end].fill(true);
                count += 1;
                if count >= self.config.occurrence_cap {
                    break;
                }
            }
            if count > 0 {
                grouped.insert(
                    (entry.term.clone(), MatchSource::Dictionary),
                    (entry.score, count),
                );
            }
        }

        grouped
            .into_iter()
            .map(|((term, source), (base_score, count))| TermContribution {
                weight: self.effective_weight(base_score, count),
                term,
                base_score,
                count,
                source,
            })
            .collect()
    }

    /// 単純平均と |score| 加重平均の中点を [-1, +1] に収める。
    fn aggregate(&self, contributions: &[TermContribution]) -> (f64, FrequencyTable) {
        let mut frequencies = FrequencyTable::default();
        for contribution in contributions {
            if contribution.base_score > 0.0 {
                frequencies.positive += contribution.count;
            } else if contribution.base_score < 0.0 {
                frequencies.negative += contribution.count;
            } else {
                frequencies.neutral += contribution.count;
            }
        }

        if contributions.is_empty() {
            return (0.0, frequencies);
        }

        let simple: f64 =
            contributions.iter().map(|c| c.weight).sum::<f64>() / contributions.len() as f64;

        let abs_sum: f64 = contributions.iter().map(|c| c.weight.abs()).sum();
        let weighted = if abs_sum > f64::EPSILON {
            contributions
                .iter()
                .map(|c| c.weight * c.weight.abs())
                .sum::<f64>()
                / abs_sum
        } else {
            0.0
        };

        let score = ((simple + weighted) / 2.0).clamp(-1.0, 1.0);
        (score, frequencies)
    }

    fn label_for(&self, score: f64) -> SentimentLabel {
        if score > self.config.positive_threshold {
            SentimentLabel::Positive
        } else if score < self.config.negative_threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    /// 文単位ハイライト。。！？と改行で分割し、短文と日本語比率の低い行を除く。
    fn collect_highlights(&self, text: &str) -> Vec<SentenceHighlight> {
        let mut highlights: Vec<SentenceHighlight> = text
            .split(['。', '！', '？', '\n'])
            .map(str::trim)
            .filter(|sentence| sentence.chars().count() >= self.config.min_sentence_chars)
            .filter(|sentence| japanese_char_count(sentence) >= self.config.min_japanese_chars)
            .filter_map(|sentence| {
                let contributions = self.collect_contributions(sentence);
                if contributions.is_empty() {
                    return None;
                }
                let (score, _) = self.aggregate(&contributions);
                Some(SentenceHighlight {
                    sentence: sentence.to_string(),
                    score,
                    label: self.label_for(score),
                })
            })
            .collect();

        highlights.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        highlights.truncate(self.config.max_highlights);
        highlights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_fixture() -> (SentimentDictionary, SentimentConfig) {
        (SentimentDictionary::embedded(), SentimentConfig::default())
    }

    #[test]
    fn empty_input_is_neutral() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let result = engine.analyze("");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.label, SentimentLabel::Neutral);
        assert_eq!(result.match_count(), 0);
        assert!(result.highlights.is_empty());
    }

    #[test]
    fn revenue_growth_with_loss_improvement_is_positive() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let result = engine
            .analyze("売上高は前年同期比で増収となりました。営業損失の改善が進んでいます。");

        assert_eq!(result.label, SentimentLabel::Positive);
        assert!(result.score > 0.3, "score was {}", result.score);
        assert!(result.top_positive.iter().any(|c| c.term == "増収"));
        assert!(result
            .top_positive
            .iter()
            .any(|c| c.term == "営業損失の改善"));
    }

    #[test]
    fn negated_growth_with_profit_decline_is_negative() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let result = engine.analyze("成長の加速には至らず、減益となりました。");

        assert_eq!(result.label, SentimentLabel::Negative);
        assert!(result.score < -0.2, "score was {}", result.score);
        assert!(result
            .top_negative
            .iter()
            .any(|c| c.term == "成長の加速には至らず"));
    }

    #[test]
    fn score_stays_within_unit_interval() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let euphoric = "過去最高 最高益 増収増益 上方修正 増配 ".repeat(20);
        let result = engine.analyze(&euphoric);
        assert!(result.score <= 1.0);
        assert!(result.score > 0.5);

        let dire = "債務超過 赤字転落 減収減益 下方修正 無配 ".repeat(20);
        let result = engine.analyze(&dire);
        assert!(result.score >= -1.0);
        assert!(result.score < -0.5);
    }

    #[test]
    fn frequency_weighting_is_bounded_by_log_formula() {
        let (dict, config) = engine_fixture();
        let cap = config.occurrence_cap;
        let engine = SentimentEngine::new(&dict, config);

        let text = "増収。".repeat(7);
        let result = engine.analyze(&text);

        let base = dict.score_of("増収").unwrap();
        let upper = base * (1.0 + 0.5 * (cap as f64).ln());
        assert!(result.score >= base - 1e-9, "score was {}", result.score);
        assert!(result.score <= upper + 1e-9, "score was {}", result.score);

        let contribution = result
            .contributions
            .iter()
            .find(|c| c.term == "増収")
            .unwrap();
        assert_eq!(contribution.count, 7);
    }

    #[test]
    fn occurrence_count_is_capped() {
        let (dict, config) = engine_fixture();
        let cap = config.occurrence_cap;
        let engine = SentimentEngine::new(&dict, config);

        let text = "増収。".repeat(30);
        let result = engine.analyze(&text);
        let contribution = result
            .contributions
            .iter()
            .find(|c| c.term == "増収")
            .unwrap();
        assert_eq!(contribution.count, cap);
    }

    #[test]
    fn longer_dictionary_terms_shadow_their_parts() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let result = engine.analyze("当期は減収減益となりました。厳しい結果です。");
        assert!(result
            .contributions
            .iter()
            .any(|c| c.term == "減収減益"));
        // 複合語に含まれる部分語は重複カウントされない
        assert!(!result.contributions.iter().any(|c| c.term == "減収"));
        assert!(!result.contributions.iter().any(|c| c.term == "減益"));
    }

    #[test]
    fn markup_split_compound_is_still_matched() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let result = engine.analyze("営業損失の<b>改善</b>が進み、増収となりました。");
        assert!(result
            .contributions
            .iter()
            .any(|c| c.term == "損失の改善" && c.source == MatchSource::Dictionary));
    }

    #[test]
    fn sections_are_scored_and_merged() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let mut sections = BTreeMap::new();
        sections.insert(
            "経営成績等の状況の概要".to_string(),
            "売上高は増収となり、営業利益も増益となりました。".to_string(),
        );
        sections.insert(
            "事業等のリスク".to_string(),
            "原材料価格の高騰による業績の悪化が懸念されます。".to_string(),
        );

        let result = engine.analyze_sections(&sections);
        assert_eq!(result.sections.len(), 2);

        let overview = result
            .sections
            .iter()
            .find(|s| s.section == "経営成績等の状況の概要")
            .unwrap();
        assert_eq!(overview.label, SentimentLabel::Positive);

        let risks = result
            .sections
            .iter()
            .find(|s| s.section == "事業等のリスク")
            .unwrap();
        assert_eq!(risks.label, SentimentLabel::Negative);
    }

    #[test]
    fn duplicate_sentences_across_sections_are_deduplicated() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        let sentence = "当期は大幅な増収増益となりました。";
        let mut sections = BTreeMap::new();
        sections.insert("概要".to_string(), sentence.to_string());
        sections.insert("分析".to_string(), sentence.to_string());

        let result = engine.analyze_sections(&sections);
        let occurrences = result
            .highlights
            .iter()
            .filter(|h| h.sentence.contains("増収増益"))
            .count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn short_sentences_are_not_highlighted() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);

        // 10文字未満の文はハイライト対象外
        let result = engine.analyze("増収です。この文は十分に長く増益も含んでいます。");
        assert!(result
            .highlights
            .iter()
            .all(|h| h.sentence.chars().count() >= 10));
    }

    #[test]
    fn label_thresholds_are_strict() {
        let (dict, config) = engine_fixture();
        let engine = SentimentEngine::new(&dict, config);
        assert_eq!(engine.label_for(0.15), SentimentLabel::Neutral);
        assert_eq!(engine.label_for(0.1501), SentimentLabel::Positive);
        assert_eq!(engine.label_for(-0.15), SentimentLabel::Neutral);
        assert_eq!(engine.label_for(-0.1501), SentimentLabel::Negative);
    }
}
