use crate::finance::{CashflowAnalysis, CashflowPattern, RiskLevel};
use crate::sentiment::{SentimentAnalysis, SentimentLabel};

use super::{InvestmentPoint, PointSource};

fn point(title: &str, description: String) -> InvestmentPoint {
    InvestmentPoint {
        title: title.to_string(),
        description,
        source: PointSource::Fallback,
    }
}

fn sentiment_point(analysis: &SentimentAnalysis) -> InvestmentPoint {
    match analysis.label {
        SentimentLabel::Positive if analysis.score > 0.5 => point(
            "経営陣のトーンは強気",
            format!(
                "経営コメントの感情スコアは {:.2} と明確にポジティブです。増収・改善系の表現が目立ちます。",
                analysis.score
            ),
        ),
        SentimentLabel::Positive => point(
            "経営コメントはやや前向き",
            format!(
                "感情スコアは {:.2}。前向きな表現が慎重な表現を上回っています。",
                analysis.score
            ),
        ),
        SentimentLabel::Negative if analysis.score < -0.5 => point(
            "経営コメントに強い警戒感",
            format!(
                "感情スコアは {:.2} と大きくマイナスです。減益・悪化系の表現が頻出しています。",
                analysis.score
            ),
        ),
        SentimentLabel::Negative => point(
            "経営コメントはやや慎重",
            format!(
                "感情スコアは {:.2}。慎重な表現が前向きな表現を上回っています。",
                analysis.score
            ),
        ),
        SentimentLabel::Neutral => point(
            "経営コメントは中立",
            format!(
                "感情スコアは {:.2}。トーンを大きく傾ける表現は見られませんでした。",
                analysis.score
            ),
        ),
    }
}

fn keyword_point(analysis: &SentimentAnalysis) -> Option<InvestmentPoint> {
    let mut terms: Vec<&str> = analysis
        .top_positive
        .iter()
        .chain(analysis.top_negative.iter())
        .take(5)
        .map(|c| c.term.as_str())
        .collect();
    if terms.is_empty() {
        return None;
    }
    terms.truncate(5);
    Some(point(
        "頻出キーワード",
        format!("本文で特徴的だった表現: {}。", terms.join("、")),
    ))
}

fn pattern_point(finance: &CashflowAnalysis) -> InvestmentPoint {
    let description = match finance.pattern {
        CashflowPattern::Ideal => {
            "本業で稼いだ資金を投資と株主還元・返済に回す優良型の資金繰りです。".to_string()
        }
        CashflowPattern::Growth => {
            "本業の黒字に加えて調達も使い、投資を積み増す成長投資型です。".to_string()
        }
        CashflowPattern::Mature => {
            "投資回収と返済が中心の成熟型です。成長投資の動向に注意が必要です。".to_string()
        }
        CashflowPattern::Recovery => {
            "全区分で現金を積み上げる回復型です。再建局面の可能性があります。".to_string()
        }
        CashflowPattern::EarlyExpansion => {
            "本業が未黒字のまま調達で投資を賄う先行投資型です。".to_string()
        }
        CashflowPattern::Distressed => {
            "本業赤字を資産売却と調達で補う要警戒型です。".to_string()
        }
        CashflowPattern::Restructuring => {
            "資産売却で返済を進める構造調整型です。".to_string()
        }
        CashflowPattern::Critical => {
            "全区分で資金が流出する危機型です。資金繰りの確認が必須です。".to_string()
        }
        CashflowPattern::Unknown => {
            "キャッシュフローの全区分が揃わず、パターン判定はできませんでした。".to_string()
        }
    };

    point(
        &format!("資金繰りパターン: {}", finance.pattern.label_ja()),
        description,
    )
}

fn risk_point(finance: &CashflowAnalysis) -> InvestmentPoint {
    let description = match finance.risk {
        RiskLevel::Low => format!(
            "健全性スコアは {:.0} 点。資金繰りリスクは低い水準です。",
            finance.health_score
        ),
        RiskLevel::Medium => format!(
            "健全性スコアは {:.0} 点。決算ごとの推移を確認したい水準です。",
            finance.health_score
        ),
        RiskLevel::High => format!(
            "健全性スコアは {:.0} 点。財務面のリスクが高く、慎重な判断が必要です。",
            finance.health_score
        ),
    };
    point("財務リスク評価", description)
}

fn data_quality_point(finance: &CashflowAnalysis) -> Option<InvestmentPoint> {
    if finance.completeness >= 0.5 {
        return None;
    }
    Some(point(
        "データの制約",
        format!(
            "財務データの充足度は {:.0}% にとどまります。未抽出項目がある前提で解釈してください。",
            finance.completeness * 100.0
        ),
    ))
}

/// LLM を使わない決定的な投資ポイント生成。
/// 入力の組み合わせによらず必ず 3 件以上を返す。
pub fn fallback_points(
    sentiment: Option<&SentimentAnalysis>,
    finance: Option<&CashflowAnalysis>,
) -> Vec<InvestmentPoint> {
    let mut points = Vec::new();

    if let Some(analysis) = sentiment {
        points.push(sentiment_point(analysis));
        if let Some(keywords) = keyword_point(analysis) {
            points.push(keywords);
        }
    }

    if let Some(analysis) = finance {
        points.push(pattern_point(analysis));
        points.push(risk_point(analysis));
        if let Some(quality) = data_quality_point(analysis) {
            points.push(quality);
        }
    }

    if points.len() < 3 {
        points.push(point(
            "情報の確認を推奨",
            "本書類から機械抽出できた情報が限られています。原本の確認を推奨します。".into(),
        ));
    }
    if points.len() < 3 {
        points.push(point(
            "継続的なモニタリング",
            "次回開示での数値更新を待って判断材料を増やすことを推奨します。".into(),
        ));
    }
    if points.len() < 3 {
        points.push(point(
            "自動分析の範囲",
            "本分析は開示書類の機械抽出に基づくものであり、投資判断の唯一の根拠にはなりません。".into(),
        ));
    }

    points.truncate(5);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::FinancialFacts;
    use crate::sentiment::SentimentAnalysis;

    #[test]
    fn no_inputs_still_yields_three_points() {
        let points = fallback_points(None, None);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.source == PointSource::Fallback));
    }

    #[test]
    fn full_inputs_stay_within_five_points() {
        let sentiment = SentimentAnalysis::neutral_empty();
        let finance = crate::finance::analyze(&FinancialFacts {
            operating_cf: Some(100),
            investing_cf: Some(-50),
            financing_cf: Some(-30),
            net_sales: Some(1000),
            operating_income: Some(80),
            net_income: Some(50),
            total_assets: Some(500),
            net_assets: Some(300),
            ..Default::default()
        });

        let points = fallback_points(Some(&sentiment), Some(&finance));
        assert!(points.len() >= 3);
        assert!(points.len() <= 5);
        assert!(points.iter().any(|p| p.title.contains("資金繰りパターン")));
    }

    #[test]
    fn distressed_pattern_warns_about_cash() {
        let finance = crate::finance::analyze(&FinancialFacts {
            operating_cf: Some(-100),
            investing_cf: Some(50),
            financing_cf: Some(80),
            ..Default::default()
        });
        let points = fallback_points(None, Some(&finance));
        assert!(points
            .iter()
            .any(|p| p.description.contains("要警戒")));
    }
}
