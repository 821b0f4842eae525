pub mod health;
pub mod pattern;

use serde::{Deserialize, Serialize};

use crate::extraction::FinancialFacts;

pub use health::{ComponentScore, HealthWeights, DEFAULT_WEIGHTS};
pub use pattern::{classify_pattern, CashflowPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// キャッシュフロー診断の結果一式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowAnalysis {
    /// [0, 100] の健全性スコア
    pub health_score: f64,
    pub pattern: CashflowPattern,
    pub risk: RiskLevel,
    pub components: Vec<ComponentScore>,
    /// 判定に使えた入力の重み比率 [0, 1]
    pub completeness: f64,
}

/// 抽出済み財務数値からキャッシュフロー診断を行う。
///
/// 欠損項目は重みの再配分で吸収し、スコアをゼロに引きずらない。
pub fn analyze(facts: &FinancialFacts) -> CashflowAnalysis {
    let (health_score, components, completeness) = health::score(facts, &DEFAULT_WEIGHTS);
    let pattern = classify_pattern(facts.operating_cf, facts.investing_cf, facts.financing_cf);
    let risk = risk_level(health_score, pattern);

    CashflowAnalysis {
        health_score,
        pattern,
        risk,
        components,
        completeness,
    }
}

fn risk_level(score: f64, pattern: CashflowPattern) -> RiskLevel {
    if score >= 70.0 && matches!(pattern, CashflowPattern::Ideal | CashflowPattern::Growth) {
        return RiskLevel::Low;
    }
    if score < 40.0 || matches!(pattern, CashflowPattern::Critical | CashflowPattern::Distressed) {
        return RiskLevel::High;
    }
    RiskLevel::Medium
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ideal_facts() -> FinancialFacts {
        FinancialFacts {
            operating_cf: Some(100),
            investing_cf: Some(-50),
            financing_cf: Some(-30),
            net_sales: Some(1000),
            operating_income: Some(80),
            net_income: Some(50),
            total_assets: Some(500),
            net_assets: Some(300),
            ..Default::default()
        }
    }

    #[test]
    fn ideal_company_scores_low_risk() {
        let analysis = analyze(&ideal_facts());
        assert_eq!(analysis.pattern, CashflowPattern::Ideal);
        assert!(analysis.health_score >= 70.0, "score {}", analysis.health_score);
        assert_eq!(analysis.risk, RiskLevel::Low);
    }

    #[test]
    fn critical_pattern_is_high_risk() {
        let facts = FinancialFacts {
            operating_cf: Some(-100),
            investing_cf: Some(-40),
            financing_cf: Some(-10),
            net_sales: Some(1000),
            operating_income: Some(-120),
            net_income: Some(-90),
            total_assets: Some(500),
            net_assets: Some(30),
            ..Default::default()
        };
        let analysis = analyze(&facts);
        assert_eq!(analysis.pattern, CashflowPattern::Critical);
        assert_eq!(analysis.risk, RiskLevel::High);
    }

    #[test]
    fn missing_inputs_reduce_completeness_not_score() {
        let sparse = FinancialFacts {
            operating_cf: Some(100),
            investing_cf: Some(-50),
            ..Default::default()
        };
        let analysis = analyze(&sparse);
        assert!(analysis.completeness < 1.0);
        // OCF と FCF が好調なら、欠損があっても満点近くまで届く
        assert!(analysis.health_score > 70.0);
        assert_eq!(analysis.pattern, CashflowPattern::Unknown);
    }

    #[test]
    fn high_score_with_unknown_pattern_is_medium_risk() {
        let sparse = FinancialFacts {
            operating_cf: Some(100),
            investing_cf: Some(-50),
            ..Default::default()
        };
        let analysis = analyze(&sparse);
        assert_eq!(analysis.risk, RiskLevel::Medium);
    }
}
