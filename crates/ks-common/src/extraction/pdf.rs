use thiserror::Error;
use tracing::{debug, warn};

use crate::normalize::collapse_whitespace;

#[derive(Debug, Error)]
pub enum PdfTextError {
    #[error("failed to load pdf: {0}")]
    Load(String),
    #[error("no text content extracted")]
    Empty,
}

/// PDF からのテキスト抽出（XBRL に記述ブロックが無い書類のフォールバック）。
/// ページ単位の失敗はスキップして残りを返す。
pub fn extract_text(bytes: &[u8]) -> Result<String, PdfTextError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| PdfTextError::Load(e.to_string()))?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "extracting pdf text");

    let mut text = String::new();
    for (&page_number, _) in pages.iter() {
        match doc.extract_text(&[page_number]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(err) => {
                warn!(page = page_number, error = %err, "skipping unreadable pdf page");
            }
        }
    }

    let cleaned = collapse_whitespace(&text);
    if cleaned.is_empty() {
        return Err(PdfTextError::Empty);
    }

    Ok(cleaned)
}
