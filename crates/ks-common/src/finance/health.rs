use serde::{Deserialize, Serialize};

use crate::extraction::FinancialFacts;

/// 健全性スコアの重み配分。
/// 営業CFの黒字を最重視し、FCF・財務体質・収益性の順に効かせる。
pub const DEFAULT_WEIGHTS: HealthWeights = HealthWeights {
    operating_cf: 0.35,
    free_cf: 0.25,
    equity_ratio: 0.15,
    margins: 0.15,
    roa: 0.10,
};

#[derive(Debug, Clone, Copy)]
pub struct HealthWeights {
    pub operating_cf: f64,
    pub free_cf: f64,
    pub equity_ratio: f64,
    pub margins: f64,
    pub roa: f64,
}

impl HealthWeights {
    pub fn sum(&self) -> f64 {
        self.operating_cf + self.free_cf + self.equity_ratio + self.margins + self.roa
    }
}

/// 1コンポーネント分の判定。score は [0, 1]。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    pub available: bool,
    pub details: String,
}

fn unavailable(name: &'static str, weight: f64) -> ComponentScore {
    ComponentScore {
        name: name.to_string(),
        score: 0.0,
        weight,
        available: false,
        details: "判定に必要な項目が未抽出".into(),
    }
}

fn ratio(numerator: i64, denominator: i64) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    Some(numerator as f64 / denominator as f64)
}

fn score_operating_cf(facts: &FinancialFacts, weight: f64) -> ComponentScore {
    let Some(ocf) = facts.operating_cf else {
        return unavailable("operating_cf", weight);
    };

    let (score, details) = if ocf > 0 {
        match facts.net_sales.and_then(|sales| ratio(ocf, sales)) {
            Some(margin) if margin >= 0.08 => {
                (1.0, format!("営業CF黒字・対売上 {:.1}%", margin * 100.0))
            }
            Some(margin) => (0.8, format!("営業CF黒字・対売上 {:.1}%", margin * 100.0)),
            None => (0.8, "営業CF黒字（売上高は未抽出）".into()),
        }
    } else {
        (0.0, "営業CFが赤字".into())
    };

    ComponentScore {
        name: "operating_cf".to_string(),
        score,
        weight,
        available: true,
        details,
    }
}

fn score_free_cf(facts: &FinancialFacts, weight: f64) -> ComponentScore {
    let (Some(ocf), Some(icf)) = (facts.operating_cf, facts.investing_cf) else {
        return unavailable("free_cf", weight);
    };
    let fcf = ocf + icf;

    let (score, details) = if fcf > 0 {
        match facts.net_sales.and_then(|sales| ratio(fcf, sales)) {
            Some(margin) if margin >= 0.05 => {
                (1.0, format!("FCF黒字・対売上 {:.1}%", margin * 100.0))
            }
            Some(margin) => (0.7, format!("FCF黒字・対売上 {:.1}%", margin * 100.0)),
            None => (0.7, "FCF黒字（売上高は未抽出）".into()),
        }
    } else {
        (0.2, "FCFがマイナス".into())
    };

    ComponentScore {
        name: "free_cf".to_string(),
        score,
        weight,
        available: true,
        details,
    }
}

fn score_equity_ratio(facts: &FinancialFacts, weight: f64) -> ComponentScore {
    let ratio = match (facts.net_assets, facts.total_assets) {
        (Some(net), Some(total)) if total > 0 => net as f64 / total as f64,
        _ => return unavailable("equity_ratio", weight),
    };

    let score = if ratio >= 0.5 {
        1.0
    } else if ratio >= 0.3 {
        0.7
    } else if ratio >= 0.1 {
        0.4
    } else {
        0.1
    };

    ComponentScore {
        name: "equity_ratio".to_string(),
        score,
        weight,
        available: true,
        details: format!("自己資本比率 {:.1}%", ratio * 100.0),
    }
}

fn margin_band(margin: f64) -> f64 {
    if margin >= 0.10 {
        1.0
    } else if margin >= 0.05 {
        0.7
    } else if margin >= 0.0 {
        0.4
    } else {
        0.0
    }
}

fn score_margins(facts: &FinancialFacts, weight: f64) -> ComponentScore {
    let Some(sales) = facts.net_sales.filter(|s| *s > 0) else {
        return unavailable("margins", weight);
    };

    let mut bands = Vec::new();
    let mut parts = Vec::new();
    if let Some(op) = facts.operating_income {
        let margin = op as f64 / sales as f64;
        bands.push(margin_band(margin));
        parts.push(format!("営業利益率 {:.1}%", margin * 100.0));
    }
    if let Some(net) = facts.net_income {
        let margin = net as f64 / sales as f64;
        bands.push(margin_band(margin));
        parts.push(format!("純利益率 {:.1}%", margin * 100.0));
    }

    if bands.is_empty() {
        return unavailable("margins", weight);
    }

    ComponentScore {
        name: "margins".to_string(),
        score: bands.iter().sum::<f64>() / bands.len() as f64,
        weight,
        available: true,
        details: parts.join("、"),
    }
}

fn score_roa(facts: &FinancialFacts, weight: f64) -> ComponentScore {
    let roa = match (facts.net_income, facts.total_assets) {
        (Some(income), Some(total)) if total > 0 => income as f64 / total as f64,
        _ => return unavailable("roa", weight),
    };

    let score = if roa >= 0.08 {
        1.0
    } else if roa >= 0.04 {
        0.7
    } else if roa >= 0.0 {
        0.4
    } else {
        0.0
    };

    ComponentScore {
        name: "roa".to_string(),
        score,
        weight,
        available: true,
        details: format!("ROA {:.1}%", roa * 100.0),
    }
}

/// 健全性スコア本体。欠損コンポーネントは分母から外して再正規化する。
/// 戻り値は (score[0..100], components, completeness[0..1])。
pub fn score(facts: &FinancialFacts, weights: &HealthWeights) -> (f64, Vec<ComponentScore>, f64) {
    let components = vec![
        score_operating_cf(facts, weights.operating_cf),
        score_free_cf(facts, weights.free_cf),
        score_equity_ratio(facts, weights.equity_ratio),
        score_margins(facts, weights.margins),
        score_roa(facts, weights.roa),
    ];

    let available_weight: f64 = components
        .iter()
        .filter(|c| c.available)
        .map(|c| c.weight)
        .sum();

    let health_score = if available_weight > f64::EPSILON {
        let weighted: f64 = components
            .iter()
            .filter(|c| c.available)
            .map(|c| c.score * c.weight)
            .sum();
        (weighted / available_weight * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let completeness = available_weight / weights.sum();

    (health_score, components, completeness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        assert!((DEFAULT_WEIGHTS.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn strong_filer_scores_above_ninety() {
        let facts = FinancialFacts {
            operating_cf: Some(100),
            investing_cf: Some(-50),
            financing_cf: Some(-30),
            net_sales: Some(1000),
            operating_income: Some(80),
            net_income: Some(50),
            total_assets: Some(500),
            net_assets: Some(300),
            ..Default::default()
        };
        let (score, components, completeness) = score(&facts, &DEFAULT_WEIGHTS);
        assert!(score > 90.0, "score {score}");
        assert!((completeness - 1.0).abs() < 1e-9);
        assert!(components.iter().all(|c| c.available));
    }

    #[test]
    fn negative_operating_cf_zeroes_that_component() {
        let facts = FinancialFacts {
            operating_cf: Some(-10),
            ..Default::default()
        };
        let (_, components, _) = score(&facts, &DEFAULT_WEIGHTS);
        let ocf = components.iter().find(|c| c.name == "operating_cf").unwrap();
        assert_eq!(ocf.score, 0.0);
        assert!(ocf.available);
    }

    #[test]
    fn no_inputs_means_zero_score_and_zero_completeness() {
        let facts = FinancialFacts::default();
        let (health, _, completeness) = score(&facts, &DEFAULT_WEIGHTS);
        assert_eq!(health, 0.0);
        assert_eq!(completeness, 0.0);
    }

    #[test]
    fn margins_average_operating_and_net_bands() {
        let facts = FinancialFacts {
            net_sales: Some(1000),
            operating_income: Some(120), // 12% -> 1.0
            net_income: Some(10),        // 1% -> 0.4
            ..Default::default()
        };
        let (_, components, _) = score(&facts, &DEFAULT_WEIGHTS);
        let margins = components.iter().find(|c| c.name == "margins").unwrap();
        assert!((margins.score - 0.7).abs() < 1e-9);
    }
}
