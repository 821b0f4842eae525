use chrono::NaiveDate;
use deadpool_postgres::PoolError;
use serde::{Deserialize, Serialize};
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::util::TimedClientExt;
use crate::db::PgPool;
use crate::extraction::{FinancialFacts, PeriodInfo};

#[derive(Debug, thiserror::Error)]
pub enum FinancialStoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map financial row: {0}")]
    Mapping(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Annual,
    Quarterly,
    SemiAnnual,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Annual => "annual",
            PeriodType::Quarterly => "quarterly",
            PeriodType::SemiAnnual => "semi_annual",
        }
    }

    /// EDINET の docTypeCode から報告期間種別を推定する。
    /// 120/130: 有報、140/150: 四半期、160/170: 半期。不明は年次扱い。
    pub fn from_doc_type_code(code: Option<&str>) -> Self {
        match code {
            Some("140") | Some("150") => PeriodType::Quarterly,
            Some("160") | Some("170") => PeriodType::SemiAnnual,
            _ => PeriodType::Annual,
        }
    }
}

fn parse_period_type(value: &str) -> Result<PeriodType, FinancialStoreError> {
    match value {
        "annual" => Ok(PeriodType::Annual),
        "quarterly" => Ok(PeriodType::Quarterly),
        "semi_annual" => Ok(PeriodType::SemiAnnual),
        other => Err(FinancialStoreError::Mapping(format!(
            "unknown period_type: {other}"
        ))),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `kaiseki.financial_data` 1行分。比率は保存前に必ず再計算される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialDataRecord {
    pub doc_id: String,
    pub edinet_code: Option<String>,
    pub period_type: PeriodType,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub fiscal_year: Option<i32>,
    pub net_sales: Option<i64>,
    pub operating_income: Option<i64>,
    pub ordinary_income: Option<i64>,
    pub net_income: Option<i64>,
    pub total_assets: Option<i64>,
    pub total_liabilities: Option<i64>,
    pub net_assets: Option<i64>,
    pub operating_cf: Option<i64>,
    pub investing_cf: Option<i64>,
    pub financing_cf: Option<i64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub roa: Option<f64>,
    pub equity_ratio: Option<f64>,
    pub data_completeness: f64,
    pub extraction_confidence: f64,
}

impl FinancialDataRecord {
    pub fn from_extraction(
        doc_id: &str,
        edinet_code: Option<&str>,
        period_type: PeriodType,
        period: Option<&PeriodInfo>,
        facts: &FinancialFacts,
        extraction_confidence: f64,
    ) -> Self {
        let mut record = Self {
            doc_id: doc_id.to_string(),
            edinet_code: edinet_code.map(str::to_string),
            period_type,
            period_start: period.map(|p| p.start),
            period_end: period.map(|p| p.end),
            fiscal_year: period.map(|p| p.fiscal_year),
            net_sales: facts.net_sales,
            operating_income: facts.operating_income,
            ordinary_income: facts.ordinary_income,
            net_income: facts.net_income,
            total_assets: facts.total_assets,
            total_liabilities: facts.total_liabilities,
            net_assets: facts.net_assets,
            operating_cf: facts.operating_cf,
            investing_cf: facts.investing_cf,
            financing_cf: facts.financing_cf,
            operating_margin: None,
            net_margin: None,
            roa: None,
            equity_ratio: None,
            data_completeness: facts.completeness(),
            extraction_confidence,
        };
        record.recompute_ratios();
        record
    }

    /// 比率の決定的な再計算。分母が欠損またはゼロ以下なら None のまま。
    pub fn recompute_ratios(&mut self) {
        let sales = self.net_sales.filter(|v| *v > 0);
        let assets = self.total_assets.filter(|v| *v > 0);

        self.operating_margin = match (self.operating_income, sales) {
            (Some(op), Some(sales)) => Some(round2(op as f64 / sales as f64 * 100.0)),
            _ => None,
        };
        self.net_margin = match (self.net_income, sales) {
            (Some(net), Some(sales)) => Some(round2(net as f64 / sales as f64 * 100.0)),
            _ => None,
        };
        self.roa = match (self.net_income, assets) {
            (Some(net), Some(assets)) => Some(round2(net as f64 / assets as f64 * 100.0)),
            _ => None,
        };
        self.equity_ratio = match (self.net_assets, assets) {
            (Some(net), Some(assets)) => Some(round2(net as f64 / assets as f64 * 100.0)),
            _ => None,
        };
    }
}

fn row_to_financial(row: &Row) -> Result<FinancialDataRecord, FinancialStoreError> {
    Ok(FinancialDataRecord {
        doc_id: row.try_get("doc_id")?,
        edinet_code: row.try_get("edinet_code")?,
        period_type: parse_period_type(row.try_get::<_, String>("period_type")?.as_str())?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        fiscal_year: row.try_get("fiscal_year")?,
        net_sales: row.try_get("net_sales")?,
        operating_income: row.try_get("operating_income")?,
        ordinary_income: row.try_get("ordinary_income")?,
        net_income: row.try_get("net_income")?,
        total_assets: row.try_get("total_assets")?,
        total_liabilities: row.try_get("total_liabilities")?,
        net_assets: row.try_get("net_assets")?,
        operating_cf: row.try_get("operating_cf")?,
        investing_cf: row.try_get("investing_cf")?,
        financing_cf: row.try_get("financing_cf")?,
        operating_margin: row.try_get("operating_margin")?,
        net_margin: row.try_get("net_margin")?,
        roa: row.try_get("roa")?,
        equity_ratio: row.try_get("equity_ratio")?,
        data_completeness: row.try_get("data_completeness")?,
        extraction_confidence: row.try_get("extraction_confidence")?,
    })
}

/// (doc, period_type, period_start, period_end) で一意な行を upsert する。
#[instrument(skip(pool, record), fields(doc_id = %record.doc_id))]
pub async fn upsert_financial_data(
    pool: &PgPool,
    record: &FinancialDataRecord,
) -> Result<(), FinancialStoreError> {
    let mut record = record.clone();
    record.recompute_ratios();

    let client = pool.get().await?;
    client
        .timed_execute(
            "INSERT INTO kaiseki.financial_data (\
                doc_id, edinet_code, period_type, period_start, period_end, fiscal_year, \
                net_sales, operating_income, ordinary_income, net_income, \
                total_assets, total_liabilities, net_assets, \
                operating_cf, investing_cf, financing_cf, \
                operating_margin, net_margin, roa, equity_ratio, \
                data_completeness, extraction_confidence\
            ) VALUES (\
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22\
            ) \
            ON CONFLICT (doc_id, period_type, period_start, period_end) DO UPDATE SET \
                edinet_code = EXCLUDED.edinet_code, \
                fiscal_year = EXCLUDED.fiscal_year, \
                net_sales = EXCLUDED.net_sales, \
                operating_income = EXCLUDED.operating_income, \
                ordinary_income = EXCLUDED.ordinary_income, \
                net_income = EXCLUDED.net_income, \
                total_assets = EXCLUDED.total_assets, \
                total_liabilities = EXCLUDED.total_liabilities, \
                net_assets = EXCLUDED.net_assets, \
                operating_cf = EXCLUDED.operating_cf, \
                investing_cf = EXCLUDED.investing_cf, \
                financing_cf = EXCLUDED.financing_cf, \
                operating_margin = EXCLUDED.operating_margin, \
                net_margin = EXCLUDED.net_margin, \
                roa = EXCLUDED.roa, \
                equity_ratio = EXCLUDED.equity_ratio, \
                data_completeness = EXCLUDED.data_completeness, \
                extraction_confidence = EXCLUDED.extraction_confidence, \
                updated_at = NOW()",
            &[
                &record.doc_id,
                &record.edinet_code,
                &record.period_type.as_str(),
                &record.period_start,
                &record.period_end,
                &record.fiscal_year,
                &record.net_sales,
                &record.operating_income,
                &record.ordinary_income,
                &record.net_income,
                &record.total_assets,
                &record.total_liabilities,
                &record.net_assets,
                &record.operating_cf,
                &record.investing_cf,
                &record.financing_cf,
                &record.operating_margin,
                &record.net_margin,
                &record.roa,
                &record.equity_ratio,
                &record.data_completeness,
                &record.extraction_confidence,
            ],
            "financials.upsert",
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_financials_for_document(
    pool: &PgPool,
    doc_id: &str,
) -> Result<Vec<FinancialDataRecord>, FinancialStoreError> {
    let client = pool.get().await?;
    let rows = client
        .timed_query(
            "SELECT doc_id, edinet_code, period_type, period_start, period_end, fiscal_year, \
                net_sales, operating_income, ordinary_income, net_income, \
                total_assets, total_liabilities, net_assets, \
                operating_cf, investing_cf, financing_cf, \
                operating_margin, net_margin, roa, equity_ratio, \
                data_completeness, extraction_confidence \
             FROM kaiseki.financial_data WHERE doc_id = $1 ORDER BY period_end DESC NULLS LAST",
            &[&doc_id],
            "financials.list_for_document",
        )
        .await?;
    rows.iter().map(row_to_financial).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(facts: FinancialFacts) -> FinancialDataRecord {
        FinancialDataRecord::from_extraction(
            "S100A000",
            Some("E01234"),
            PeriodType::Annual,
            None,
            &facts,
            0.8,
        )
    }

    #[test]
    fn margins_follow_round_two_rule() {
        let record = record_with(FinancialFacts {
            net_sales: Some(3000),
            operating_income: Some(1000),
            ..Default::default()
        });
        // 1000 / 3000 * 100 = 33.333... -> 33.33
        assert_eq!(record.operating_margin, Some(33.33));
        assert_eq!(record.net_margin, None);
    }

    #[test]
    fn missing_divisor_keeps_ratios_null() {
        let record = record_with(FinancialFacts {
            operating_income: Some(1000),
            net_income: Some(500),
            net_assets: Some(300),
            ..Default::default()
        });
        assert_eq!(record.operating_margin, None);
        assert_eq!(record.roa, None);
        assert_eq!(record.equity_ratio, None);
    }

    #[test]
    fn zero_sales_never_divides() {
        let record = record_with(FinancialFacts {
            net_sales: Some(0),
            operating_income: Some(10),
            ..Default::default()
        });
        assert_eq!(record.operating_margin, None);
    }

    #[test]
    fn full_inputs_produce_all_ratios() {
        let record = record_with(FinancialFacts {
            net_sales: Some(1000),
            operating_income: Some(80),
            net_income: Some(50),
            total_assets: Some(500),
            net_assets: Some(300),
            ..Default::default()
        });
        assert_eq!(record.operating_margin, Some(8.0));
        assert_eq!(record.net_margin, Some(5.0));
        assert_eq!(record.roa, Some(10.0));
        assert_eq!(record.equity_ratio, Some(60.0));
    }

    #[test]
    fn doc_type_codes_map_to_period_types() {
        assert_eq!(
            PeriodType::from_doc_type_code(Some("120")),
            PeriodType::Annual
        );
        assert_eq!(
            PeriodType::from_doc_type_code(Some("140")),
            PeriodType::Quarterly
        );
        assert_eq!(
            PeriodType::from_doc_type_code(Some("160")),
            PeriodType::SemiAnnual
        );
        assert_eq!(PeriodType::from_doc_type_code(None), PeriodType::Annual);
    }
}
