use serde::{Deserialize, Serialize};

/// (営業CF, 投資CF, 財務CF) の符号 3 連から導く定性ラベル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashflowPattern {
    /// (+, −, −) 本業で稼ぎ、投資し、返済・還元する
    Ideal,
    /// (+, −, +) 調達も使って積極投資
    Growth,
    /// (+, +, −) 資産売却しつつ返済を進める
    Mature,
    /// (+, +, +) 全面的に現金を積む（再建後など）
    Recovery,
    /// (−, −, +) 先行投資期を調達で賄う
    EarlyExpansion,
    /// (−, +, +) 本業赤字を売却と調達で補う
    Distressed,
    /// (−, +, −) 資産売却で返済する構造調整
    Restructuring,
    /// (−, −, −) 全区分で流出
    Critical,
    Unknown,
}

impl CashflowPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashflowPattern::Ideal => "ideal",
            CashflowPattern::Growth => "growth",
            CashflowPattern::Mature => "mature",
            CashflowPattern::Recovery => "recovery",
            CashflowPattern::EarlyExpansion => "early_expansion",
            CashflowPattern::Distressed => "distressed",
            CashflowPattern::Restructuring => "restructuring",
            CashflowPattern::Critical => "critical",
            CashflowPattern::Unknown => "unknown",
        }
    }

    pub fn label_ja(&self) -> &'static str {
        match self {
            CashflowPattern::Ideal => "優良型",
            CashflowPattern::Growth => "積極投資型",
            CashflowPattern::Mature => "成熟型",
            CashflowPattern::Recovery => "回復型",
            CashflowPattern::EarlyExpansion => "先行投資型",
            CashflowPattern::Distressed => "要警戒型",
            CashflowPattern::Restructuring => "構造調整型",
            CashflowPattern::Critical => "危機型",
            CashflowPattern::Unknown => "判定不能",
        }
    }
}

/// 符号分類。ゼロまたは欠損が混じる場合は Unknown。
pub fn classify_pattern(
    operating_cf: Option<i64>,
    investing_cf: Option<i64>,
    financing_cf: Option<i64>,
) -> CashflowPattern {
    let (Some(ocf), Some(icf), Some(fcf)) = (operating_cf, investing_cf, financing_cf) else {
        return CashflowPattern::Unknown;
    };
    if ocf == 0 || icf == 0 || fcf == 0 {
        return CashflowPattern::Unknown;
    }

    match (ocf > 0, icf > 0, fcf > 0) {
        (true, false, false) => CashflowPattern::Ideal,
        (true, false, true) => CashflowPattern::Growth,
        (true, true, false) => CashflowPattern::Mature,
        (true, true, true) => CashflowPattern::Recovery,
        (false, false, true) => CashflowPattern::EarlyExpansion,
        (false, true, true) => CashflowPattern::Distressed,
        (false, true, false) => CashflowPattern::Restructuring,
        (false, false, false) => CashflowPattern::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_eight_sign_triples_classify() {
        let cases = [
            ((1, -1, -1), CashflowPattern::Ideal),
            ((1, -1, 1), CashflowPattern::Growth),
            ((1, 1, -1), CashflowPattern::Mature),
            ((1, 1, 1), CashflowPattern::Recovery),
            ((-1, -1, 1), CashflowPattern::EarlyExpansion),
            ((-1, 1, 1), CashflowPattern::Distressed),
            ((-1, 1, -1), CashflowPattern::Restructuring),
            ((-1, -1, -1), CashflowPattern::Critical),
        ];

        for ((ocf, icf, fcf), expected) in cases {
            assert_eq!(
                classify_pattern(Some(ocf), Some(icf), Some(fcf)),
                expected,
                "triple ({ocf}, {icf}, {fcf})"
            );
        }
    }

    #[test]
    fn zero_or_missing_is_unknown() {
        assert_eq!(
            classify_pattern(Some(0), Some(-1), Some(-1)),
            CashflowPattern::Unknown
        );
        assert_eq!(
            classify_pattern(None, Some(-1), Some(-1)),
            CashflowPattern::Unknown
        );
        assert_eq!(classify_pattern(None, None, None), CashflowPattern::Unknown);
    }
}
