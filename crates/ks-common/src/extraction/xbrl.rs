use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::parse_numeric;

use super::narrative;

/// 抽出対象の財務項目。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConceptField {
    OperatingCf,
    InvestingCf,
    FinancingCf,
    NetSales,
    OperatingIncome,
    OrdinaryIncome,
    NetAssets,
    TotalAssets,
    TotalLiabilities,
    NetIncome,
}

/// 要素ローカル名に対する候補パターン。`=` 始まりは完全一致、それ以外は部分一致。
/// 英語 XBRL コンセプト名と日本語ラベルの両方を持つ。
const CONCEPT_PATTERNS: &[(ConceptField, &[&str])] = &[
    (
        ConceptField::OperatingCf,
        &[
            "netcashprovidedbyusedinoperatingactivities",
            "cashflowsfromusedinoperatingactivities",
            "営業活動によるキャッシュ",
        ],
    ),
    (
        ConceptField::InvestingCf,
        &[
            "netcashprovidedbyusedininvestingactivities",
            "cashflowsfromusedininvestingactivities",
            "投資活動によるキャッシュ",
        ],
    ),
    (
        ConceptField::FinancingCf,
        &[
            "netcashprovidedbyusedinfinancingactivities",
            "cashflowsfromusedinfinancingactivities",
            "財務活動によるキャッシュ",
        ],
    ),
    (
        ConceptField::NetSales,
        &["=netsales", "netsales", "operatingrevenue", "売上高", "営業収益"],
    ),
    (
        ConceptField::OperatingIncome,
        &["operatingincome", "operatingprofit", "営業利益"],
    ),
    (
        ConceptField::OrdinaryIncome,
        &["ordinaryincome", "ordinaryprofit", "経常利益"],
    ),
    (
        ConceptField::NetAssets,
        &["=netassets", "純資産合計"],
    ),
    (
        ConceptField::TotalAssets,
        &["=assets", "totalassets", "資産合計", "総資産"],
    ),
    (
        ConceptField::TotalLiabilities,
        &["=liabilities", "totalliabilities", "負債合計"],
    ),
    (
        ConceptField::NetIncome,
        &[
            "profitlossattributabletoownersofparent",
            "netincome",
            "profitloss",
            "当期純利益",
        ],
    ),
];

fn match_concept(local_name: &str) -> Option<ConceptField> {
    for (field, patterns) in CONCEPT_PATTERNS {
        for pattern in *patterns {
            let hit = match pattern.strip_prefix('=') {
                Some(exact) => local_name == exact,
                None => local_name.contains(pattern),
            };
            if hit {
                return Some(*field);
            }
        }
    }
    None
}

/// 表の単位句。値には適用せず文脈メタデータとして報告する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableUnit {
    Thousand,
    Million,
    HundredMillion,
    Trillion,
}

impl TableUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableUnit::Thousand => "千円",
            TableUnit::Million => "百万円",
            TableUnit::HundredMillion => "億円",
            TableUnit::Trillion => "兆円",
        }
    }

    pub fn multiplier(&self) -> i64 {
        match self {
            TableUnit::Thousand => 1_000,
            TableUnit::Million => 1_000_000,
            TableUnit::HundredMillion => 100_000_000,
            TableUnit::Trillion => 1_000_000_000_000,
        }
    }

    /// 生テキスト中で最初に現れる単位句を採用する。
    pub fn detect(text: &str) -> Option<TableUnit> {
        const MARKERS: &[(TableUnit, &str)] = &[
            (TableUnit::Million, "百万円"),
            (TableUnit::Thousand, "千円"),
            (TableUnit::HundredMillion, "億円"),
            (TableUnit::Trillion, "兆円"),
        ];

        MARKERS
            .iter()
            .filter_map(|(unit, marker)| text.find(marker).map(|pos| (pos, *unit)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, unit)| unit)
    }
}

/// 正規化済みの財務数値。全項目が円建て。未抽出は None（0 は入れない）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialFacts {
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
}

impl FinancialFacts {
    pub fn field_count() -> usize {
        10
    }

    pub fn populated_count(&self) -> usize {
        [
            self.net_sales,
            self.operating_income,
            self.ordinary_income,
            self.net_income,
            self.total_assets,
            self.total_liabilities,
            self.net_assets,
            self.operating_cf,
            self.investing_cf,
            self.financing_cf,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
    }

    pub fn completeness(&self) -> f64 {
        self.populated_count() as f64 / Self::field_count() as f64
    }

    pub fn is_empty(&self) -> bool {
        self.populated_count() == 0
    }

    fn set(&mut self, field: ConceptField, value: i64) {
        let slot = match field {
            ConceptField::NetSales => &mut self.net_sales,
            ConceptField::OperatingIncome => &mut self.operating_income,
            ConceptField::OrdinaryIncome => &mut self.ordinary_income,
            ConceptField::NetIncome => &mut self.net_income,
            ConceptField::TotalAssets => &mut self.total_assets,
            ConceptField::TotalLiabilities => &mut self.total_liabilities,
            ConceptField::NetAssets => &mut self.net_assets,
            ConceptField::OperatingCf => &mut self.operating_cf,
            ConceptField::InvestingCf => &mut self.investing_cf,
            ConceptField::FinancingCf => &mut self.financing_cf,
        };
        *slot = Some(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodInfo {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub fiscal_year: i32,
}

#[derive(Debug, Clone)]
pub struct FactCandidate {
    pub field: ConceptField,
    pub value: f64,
}

/// 複数ファイルにまたがる走査の蓄積結果。
#[derive(Debug, Default)]
pub struct ScanState {
    pub candidates: Vec<FactCandidate>,
    pub sections: BTreeMap<String, String>,
    pub periods: Vec<(NaiveDate, NaiveDate)>,
}

impl ScanState {
    /// 同一項目の候補から絶対値最大のもの（本表の開示値）を採用する。
    pub fn into_facts(self) -> (FinancialFacts, Option<PeriodInfo>, BTreeMap<String, String>) {
        let mut facts = FinancialFacts::default();

        for (field, _) in CONCEPT_PATTERNS {
            let best = self
                .candidates
                .iter()
                .filter(|c| c.field == *field)
                .max_by(|a, b| {
                    a.value
                        .abs()
                        .partial_cmp(&b.value.abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            if let Some(candidate) = best {
                facts.set(*field, candidate.value.round() as i64);
            }
        }

        let period = self
            .periods
            .iter()
            .max_by_key(|(start, end)| ((*end - *start).num_days(), *end))
            .map(|(start, end)| PeriodInfo {
                start: *start,
                end: *end,
                fiscal_year: end.year(),
            });

        (facts, period, self.sections)
    }
}

struct PendingFact {
    field: ConceptField,
    decimals: Option<i32>,
    scale: Option<i32>,
    buffer: String,
}

struct PendingSection {
    name: &'static str,
    depth: usize,
    buffer: String,
}

#[derive(Clone, Copy, PartialEq)]
enum PeriodTag {
    Start,
    End,
    Instant,
}

/// XBRL/XHTML 1ファイル分の走査。財務数値・期間コンテキスト・記述セクションを
/// 1パスで拾う。パース不能箇所はその場で打ち切り、拾えた分を残す。
pub fn scan_document(xml: &str, state: &mut ScanState) {
    let mut reader = Reader::from_str(xml);

    let mut fact: Option<PendingFact> = None;
    let mut section: Option<PendingSection> = None;
    let mut in_context = false;
    let mut ctx_start: Option<NaiveDate> = None;
    let mut ctx_end: Option<NaiveDate> = None;
    let mut period_tag: Option<(PeriodTag, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();

                if let Some(active) = &mut section {
                    active.depth += 1;
                } else if let Some(name) = narrative::section_name(&local) {
                    section = Some(PendingSection {
                        name,
                        depth: 1,
                        buffer: String::new(),
                    });
                    continue;
                }

                if local == "context" {
                    in_context = true;
                    ctx_start = None;
                    ctx_end = None;
                } else if in_context
                    && matches!(local.as_str(), "startdate" | "enddate" | "instant")
                {
                    let tag = match local.as_str() {
                        "startdate" => PeriodTag::Start,
                        "enddate" => PeriodTag::End,
                        _ => PeriodTag::Instant,
                    };
                    period_tag = Some((tag, String::new()));
                } else if fact.is_none() && section.is_none() {
                    if let Some(field) = match_concept(&local) {
                        let mut decimals = None;
                        let mut scale = None;
                        for attr in e.attributes().flatten() {
                            let key =
                                String::from_utf8_lossy(attr.key.local_name().as_ref())
                                    .to_lowercase();
                            let value = attr.unescape_value().unwrap_or_default();
                            match key.as_str() {
                                "decimals" => decimals = value.trim().parse::<i32>().ok(),
                                "scale" => scale = value.trim().parse::<i32>().ok(),
                                _ => {}
                            }
                        }
                        fact = Some(PendingFact {
                            field,
                            decimals,
                            scale,
                            buffer: String::new(),
                        });
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default();

                if let Some((_, buffer)) = &mut period_tag {
                    buffer.push_str(text.trim());
                } else if let Some(active) = &mut fact {
                    active.buffer.push_str(text.trim());
                } else if let Some(active) = &mut section {
                    if active.buffer.len() < narrative::SECTION_CHAR_CAP * 4 {
                        active.buffer.push_str(&text);
                        active.buffer.push(' ');
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some((tag, buffer)) = period_tag.take() {
                    if let Ok(date) = NaiveDate::parse_from_str(buffer.trim(), "%Y-%m-%d") {
                        match tag {
                            PeriodTag::Start => ctx_start = Some(date),
                            PeriodTag::End | PeriodTag::Instant => ctx_end = Some(date),
                        }
                    }
                    continue;
                }

                if let Some(pending) = fact.take() {
                    finalize_fact(pending, state);
                    continue;
                }

                if let Some(active) = &mut section {
                    active.depth -= 1;
                    if active.depth == 0 {
                        let finished = section.take().unwrap();
                        narrative::register_section(
                            &mut state.sections,
                            finished.name,
                            &finished.buffer,
                        );
                    }
                    continue;
                }

                if in_context {
                    // End events inside a context either close a nested period
                    // element (handled above) or the context itself.
                    if let (Some(start), Some(end)) = (ctx_start, ctx_end) {
                        state.periods.push((start, end));
                        ctx_start = None;
                        ctx_end = None;
                        in_context = false;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "stopping xbrl scan on malformed xml");
                break;
            }
        }
    }
}

fn finalize_fact(pending: PendingFact, state: &mut ScanState) {
    let Some(base) = parse_numeric(&pending.buffer) else {
        return;
    };

    if let Some(scale) = pending.scale {
        if scale != 0 {
            // decimals wins; the scale attribute is observed but never applied.
            debug!(scale, field = ?pending.field, "xbrl scale attribute present, not applied");
        }
    }

    let value = match pending.decimals {
        Some(decimals) if decimals < 0 => base * 10f64.powi(decimals.abs()),
        _ => base,
    };

    state.candidates.push(FactCandidate {
        field: pending.field,
        value,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(xml: &str) -> ScanState {
        let mut state = ScanState::default();
        scan_document(xml, &mut state);
        state
    }

    #[test]
    fn extracts_facts_with_decimals_scaling() {
        let xml = r#"<xbrl>
            <jppfs:NetSales contextRef="CurrentYearDuration" decimals="-6" unitRef="JPY">1234</jppfs:NetSales>
        </xbrl>"#;
        let (facts, _, _) = scan(xml).into_facts();
        assert_eq!(facts.net_sales, Some(1_234_000_000));
    }

    #[test]
    fn triangle_marks_negative_cashflow() {
        let xml = r#"<xbrl>
            <jppfs:NetCashProvidedByUsedInInvestingActivities decimals="0">△5000</jppfs:NetCashProvidedByUsedInInvestingActivities>
        </xbrl>"#;
        let (facts, _, _) = scan(xml).into_facts();
        assert_eq!(facts.investing_cf, Some(-5000));
    }

    #[test]
    fn prefers_largest_absolute_candidate() {
        let xml = r#"<xbrl>
            <jppfs:OperatingIncome decimals="0">800</jppfs:OperatingIncome>
            <jppfs:OperatingIncome decimals="0">80000</jppfs:OperatingIncome>
        </xbrl>"#;
        let (facts, _, _) = scan(xml).into_facts();
        assert_eq!(facts.operating_income, Some(80_000));
    }

    #[test]
    fn malformed_numerals_are_ignored() {
        let xml = r#"<xbrl>
            <jppfs:NetSales decimals="0">非開示</jppfs:NetSales>
        </xbrl>"#;
        let (facts, _, _) = scan(xml).into_facts();
        assert_eq!(facts.net_sales, None);
        assert!(facts.is_empty());
    }

    #[test]
    fn net_assets_do_not_claim_total_assets() {
        let xml = r#"<xbrl>
            <jppfs:Assets decimals="0">500</jppfs:Assets>
            <jppfs:NetAssets decimals="0">300</jppfs:NetAssets>
            <jppfs:LiabilitiesAndNetAssets decimals="0">500</jppfs:LiabilitiesAndNetAssets>
        </xbrl>"#;
        let (facts, _, _) = scan(xml).into_facts();
        assert_eq!(facts.total_assets, Some(500));
        assert_eq!(facts.net_assets, Some(300));
    }

    #[test]
    fn longest_duration_context_wins() {
        let xml = r#"<xbrl>
          <xbrli:context id="Q4"><xbrli:period>
            <xbrli:startDate>2024-01-01</xbrli:startDate><xbrli:endDate>2024-03-31</xbrli:endDate>
          </xbrli:period></xbrli:context>
          <xbrli:context id="FY"><xbrli:period>
            <xbrli:startDate>2023-04-01</xbrli:startDate><xbrli:endDate>2024-03-31</xbrli:endDate>
          </xbrli:period></xbrli:context>
        </xbrl>"#;
        let (_, period, _) = scan(xml).into_facts();
        let period = period.unwrap();
        assert_eq!(period.start, NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
        assert_eq!(period.end, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(period.fiscal_year, 2024);
    }

    #[test]
    fn detects_first_table_unit_marker() {
        assert_eq!(
            TableUnit::detect("（単位：百万円） ... 千円"),
            Some(TableUnit::Million)
        );
        assert_eq!(TableUnit::detect("金額は千円単位"), Some(TableUnit::Thousand));
        assert_eq!(TableUnit::detect("単位の記載なし"), None);
    }

    #[test]
    fn completeness_reflects_populated_fields() {
        let facts = FinancialFacts {
            net_sales: Some(1000),
            operating_cf: Some(100),
            ..Default::default()
        };
        assert!((facts.completeness() - 0.2).abs() < 1e-9);
    }
}
