use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

/// EDINET v2 `documents.json` 1件分。フラグ類は "0"/"1" の文字列で届く。
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EdinetDocument {
    #[serde(rename = "docID")]
    pub doc_id: String,
    #[serde(rename = "edinetCode")]
    pub edinet_code: Option<String>,
    #[serde(rename = "secCode")]
    pub sec_code: Option<String>,
    #[serde(rename = "filerName")]
    pub filer_name: Option<String>,
    #[serde(rename = "fundCode")]
    pub fund_code: Option<String>,
    #[serde(rename = "ordinanceCode")]
    pub ordinance_code: Option<String>,
    #[serde(rename = "formCode")]
    pub form_code: Option<String>,
    #[serde(rename = "docTypeCode")]
    pub doc_type_code: Option<String>,
    #[serde(rename = "periodStart")]
    pub period_start: Option<String>,
    #[serde(rename = "periodEnd")]
    pub period_end: Option<String>,
    #[serde(rename = "submitDateTime")]
    pub submit_date_time: Option<String>,
    #[serde(rename = "docDescription")]
    pub doc_description: Option<String>,
    #[serde(rename = "xbrlFlag")]
    pub xbrl_flag: Option<String>,
    #[serde(rename = "pdfFlag")]
    pub pdf_flag: Option<String>,
    #[serde(rename = "csvFlag")]
    pub csv_flag: Option<String>,
    #[serde(rename = "attachDocFlag")]
    pub attach_doc_flag: Option<String>,
    #[serde(rename = "englishDocFlag")]
    pub english_doc_flag: Option<String>,
    #[serde(rename = "legalStatus")]
    pub legal_status: Option<String>,
    #[serde(rename = "withdrawalStatus")]
    pub withdrawal_status: Option<String>,
    #[serde(rename = "docInfoEditStatus")]
    pub doc_info_edit_status: Option<String>,
    #[serde(rename = "disclosureStatus")]
    pub disclosure_status: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1"))
}

fn status_code(value: &Option<String>, default: i16) -> i16 {
    value
        .as_deref()
        .and_then(|v| v.parse::<i16>().ok())
        .unwrap_or(default)
}

impl EdinetDocument {
    pub fn has_xbrl(&self) -> bool {
        flag(&self.xbrl_flag)
    }

    pub fn has_pdf(&self) -> bool {
        flag(&self.pdf_flag)
    }

    pub fn has_csv(&self) -> bool {
        flag(&self.csv_flag)
    }

    pub fn has_attachments(&self) -> bool {
        flag(&self.attach_doc_flag)
    }

    pub fn has_english(&self) -> bool {
        flag(&self.english_doc_flag)
    }

    /// 縦覧ステータス {0: 終了, 1: 縦覧中, 2: 延長}。欠落時は縦覧中扱い。
    pub fn legal_status_code(&self) -> i16 {
        status_code(&self.legal_status, 1)
    }

    pub fn withdrawal_status_code(&self) -> i16 {
        status_code(&self.withdrawal_status, 0)
    }

    pub fn edit_status_code(&self) -> i16 {
        status_code(&self.doc_info_edit_status, 0)
    }

    pub fn disclosure_status_code(&self) -> i16 {
        status_code(&self.disclosure_status, 0)
    }

    pub fn period_start_date(&self) -> Option<NaiveDate> {
        parse_date(self.period_start.as_deref())
    }

    pub fn period_end_date(&self) -> Option<NaiveDate> {
        parse_date(self.period_end.as_deref())
    }

    /// 提出日時はJSTの "YYYY-MM-DD HH:MM" 形式。UTC に変換して返す。
    pub fn submit_datetime_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.submit_date_time.as_deref()?;
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
            .ok()?;
        let jst = naive.and_local_timezone(crate::timezone::JST).single()?;
        Some(crate::timezone::to_utc(jst))
    }
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMetadata {
    pub title: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub resultset: Option<ResultSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultSet {
    pub count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentListResponse {
    pub metadata: ListMetadata,
    #[serde(default)]
    pub results: Vec<EdinetDocument>,
}
