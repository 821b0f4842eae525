use serde::{Deserialize, Serialize};

use crate::finance::{CashflowAnalysis, CashflowPattern, RiskLevel};
use crate::sentiment::SentimentAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStance {
    Aggressive,
    Conditional,
    Cautious,
    Avoid,
}

impl InvestmentStance {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStance::Aggressive => "aggressive",
            InvestmentStance::Conditional => "conditional",
            InvestmentStance::Cautious => "cautious",
            InvestmentStance::Avoid => "avoid",
        }
    }
}

/// 感情と財務の統合判定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedVerdict {
    /// 0〜100。両方揃えば 感情30% + 財務70%、片方ならその値。
    pub overall_score: Option<f64>,
    pub sentiment_pct: Option<f64>,
    pub financial_score: Option<f64>,
    pub risk: RiskLevel,
    pub stance: InvestmentStance,
    pub cf_pattern: CashflowPattern,
    pub recommendation: String,
}

const SENTIMENT_WEIGHT: f64 = 0.3;
const FINANCIAL_WEIGHT: f64 = 0.7;

pub fn integrate(
    sentiment: Option<&SentimentAnalysis>,
    finance: Option<&CashflowAnalysis>,
) -> IntegratedVerdict {
    let sentiment_pct = sentiment.map(|s| (s.score + 1.0) / 2.0 * 100.0);
    let financial_score = finance.map(|f| f.health_score);

    let overall_score = match (sentiment_pct, financial_score) {
        (Some(s), Some(f)) => Some(SENTIMENT_WEIGHT * s + FINANCIAL_WEIGHT * f),
        (Some(s), None) => Some(s),
        (None, Some(f)) => Some(f),
        (None, None) => None,
    };

    let cf_pattern = finance.map(|f| f.pattern).unwrap_or(CashflowPattern::Unknown);

    let risk = match finance {
        Some(f) => f.risk,
        None => match overall_score {
            Some(score) if score < 40.0 => RiskLevel::High,
            _ => RiskLevel::Medium,
        },
    };

    let stance = stance_for(overall_score, risk);

    IntegratedVerdict {
        recommendation: recommendation_for(stance, overall_score),
        overall_score,
        sentiment_pct,
        financial_score,
        risk,
        stance,
        cf_pattern,
    }
}

fn stance_for(overall: Option<f64>, risk: RiskLevel) -> InvestmentStance {
    let Some(score) = overall else {
        return InvestmentStance::Cautious;
    };

    if score >= 70.0 && risk == RiskLevel::Low {
        InvestmentStance::Aggressive
    } else if score >= 55.0 && risk != RiskLevel::High {
        InvestmentStance::Conditional
    } else if score >= 40.0 {
        InvestmentStance::Cautious
    } else {
        InvestmentStance::Avoid
    }
}

fn recommendation_for(stance: InvestmentStance, overall: Option<f64>) -> String {
    let score_note = overall
        .map(|s| format!("総合スコアは {s:.0} 点です。"))
        .unwrap_or_else(|| "総合スコアを算出できる情報がありませんでした。".to_string());

    let body = match stance {
        InvestmentStance::Aggressive => {
            "財務・トーンともに良好で、前向きな検討に値します。"
        }
        InvestmentStance::Conditional => {
            "条件付きで検討可能です。リスク要因の推移を確認してください。"
        }
        InvestmentStance::Cautious => {
            "慎重な姿勢を推奨します。追加の情報収集が必要です。"
        }
        InvestmentStance::Avoid => "現時点では見送りを推奨します。",
    };

    format!("{score_note}{body}")
}
