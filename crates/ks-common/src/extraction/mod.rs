pub mod archive;
pub mod narrative;
pub mod pdf;
pub mod xbrl;

use std::collections::BTreeMap;

use tracing::debug;

pub use archive::{ArchiveError, ArchiveMember};
pub use xbrl::{FinancialFacts, PeriodInfo, TableUnit};

/// PDF フォールバックで本文を登録するときのセクション名。
const PDF_SECTION_NAME: &str = "書類本文";

#[derive(Debug, Default)]
pub struct ExtractionOutput {
    pub financials: FinancialFacts,
    pub sections: BTreeMap<String, String>,
    pub table_unit: Option<TableUnit>,
    pub period: Option<PeriodInfo>,
}

impl ExtractionOutput {
    pub fn is_empty(&self) -> bool {
        self.financials.is_empty() && self.sections.is_empty()
    }

    /// 抽出確度。数値の充足度と記述セクションの有無から算出する。
    pub fn extraction_confidence(&self) -> f64 {
        let fact_part = self.financials.completeness() * 0.7;
        let section_part = if self.sections.is_empty() { 0.0 } else { 0.3 };
        fact_part + section_part
    }
}

/// ダウンロード済み書類アーカイブから財務数値と記述テキストを取り出す。
///
/// 先頭が ZIP マジックなら ZIP として展開し、そうでなければ単一 XML として
/// 解釈する。メンバー単位の失敗は読み飛ばし、取れた分だけを返す。
pub fn extract_archive(bytes: &[u8]) -> Result<ExtractionOutput, ArchiveError> {
    let mut state = xbrl::ScanState::default();
    let mut table_unit: Option<TableUnit> = None;
    let mut pdf_bytes: Option<Vec<u8>> = None;

    if archive::is_zip(bytes) {
        let members = archive::list_members(bytes)?;
        debug!(members = members.len(), "scanning archive members");

        for member in &members {
            if member.is_xml_like() {
                let text = archive::decode_bytes(&member.bytes);
                if table_unit.is_none() {
                    table_unit = TableUnit::detect(&text);
                }
                xbrl::scan_document(&text, &mut state);
            } else if member.is_pdf() && pdf_bytes.is_none() {
                pdf_bytes = Some(member.bytes.clone());
            }
        }
    } else {
        let text = archive::decode_bytes(bytes);
        table_unit = TableUnit::detect(&text);
        xbrl::scan_document(&text, &mut state);
    }

    let (financials, period, mut sections) = state.into_facts();

    // 記述ブロックが一つも取れなかった場合のみ PDF 本文に頼る。
    if sections.is_empty() {
        if let Some(raw) = pdf_bytes {
            match pdf::extract_text(&raw) {
                Ok(text) => narrative::register_section(&mut sections, PDF_SECTION_NAME, &text),
                Err(err) => debug!(error = %err, "pdf fallback produced no text"),
            }
        }
    }

    Ok(ExtractionOutput {
        financials,
        sections,
        table_unit,
        period,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zip_input_is_parsed_as_xml() {
        let xml = r#"<xbrl>
            <jppfs:NetSales decimals="-6">1000</jppfs:NetSales>
            <jppfs:OperatingIncome decimals="-6">80</jppfs:OperatingIncome>
        </xbrl>"#;
        let output = extract_archive(xml.as_bytes()).unwrap();
        assert_eq!(output.financials.net_sales, Some(1_000_000_000));
        assert_eq!(output.financials.operating_income, Some(80_000_000));
        assert!(!output.is_empty());
    }

    #[test]
    fn corrupt_zip_is_an_error() {
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(extract_archive(&bytes).is_err());
    }

    #[test]
    fn unit_phrase_is_reported_not_applied() {
        let xml = r#"<doc>（単位：百万円）<jppfs:NetSales decimals="-6">1234</jppfs:NetSales></doc>"#;
        let output = extract_archive(xml.as_bytes()).unwrap();
        assert_eq!(output.table_unit, Some(TableUnit::Million));
        // decimals already normalized the value; the phrase stays contextual
        assert_eq!(output.financials.net_sales, Some(1_234_000_000));
    }

    #[test]
    fn confidence_blends_facts_and_sections() {
        let empty = ExtractionOutput::default();
        assert_eq!(empty.extraction_confidence(), 0.0);

        let mut with_section = ExtractionOutput::default();
        with_section
            .sections
            .insert("事業等のリスク".into(), "本文".into());
        assert!((with_section.extraction_confidence() - 0.3).abs() < 1e-9);
    }
}
