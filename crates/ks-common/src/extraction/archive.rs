use std::io::{Cursor, Read};

use encoding_rs::{EUC_JP, SHIFT_JIS, UTF_8};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to read archive member: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveMember {
    pub fn is_xml_like(&self) -> bool {
        let lower = self.name.to_ascii_lowercase();
        lower.ends_with(".xbrl")
            || lower.ends_with(".xml")
            || lower.ends_with(".htm")
            || lower.ends_with(".html")
    }

    pub fn is_pdf(&self) -> bool {
        self.name.to_ascii_lowercase().ends_with(".pdf")
    }
}

pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

/// スタイル資産・manifest・縦覧用 (public) パスは解析対象外。
pub fn should_skip(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with("manifest.xml") || lower.contains("public") {
        return true;
    }
    const ASSET_EXTS: &[&str] = &[".css", ".js", ".gif", ".png", ".jpg", ".jpeg", ".svg"];
    ASSET_EXTS.iter().any(|ext| lower.ends_with(ext))
}

/// ZIP 内の解析対象メンバーをメモリに展開する。
///
/// 個別メンバーの読み取り失敗はスキップして続行する。アーカイブ自体が
/// 開けない場合のみエラー。
pub fn list_members(bytes: &[u8]) -> Result<Vec<ArchiveMember>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut members = Vec::new();

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(index, error = %err, "skipping unreadable archive member");
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if should_skip(&name) {
            continue;
        }

        let mut buffer = Vec::with_capacity(entry.size() as usize);
        if let Err(err) = entry.read_to_end(&mut buffer) {
            debug!(member = %name, error = %err, "skipping member with read failure");
            continue;
        }

        members.push(ArchiveMember {
            name,
            bytes: buffer,
        });
    }

    Ok(members)
}

/// UTF-8 → Shift_JIS → EUC-JP の順で試し、全滅なら UTF-8 置換デコード。
pub fn decode_bytes(bytes: &[u8]) -> String {
    for encoding in [UTF_8, SHIFT_JIS, EUC_JP] {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return text.into_owned();
        }
    }
    UTF_8.decode(bytes).0.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_zip_magic() {
        assert!(is_zip(b"PK\x03\x04rest"));
        assert!(!is_zip(b"<?xml version=\"1.0\"?>"));
        assert!(!is_zip(b""));
    }

    #[test]
    fn skips_manifest_assets_and_public_paths() {
        assert!(should_skip("XBRL/PublicDoc/manifest.xml"));
        assert!(should_skip("XBRL/PublicDoc/0101010_honbun.htm"));
        assert!(should_skip("styles/report.css"));
        assert!(should_skip("images/logo.PNG"));
        assert!(!should_skip("XBRL/AuditDoc/jpcrp030000-asr-001_E01234-000_2024-03-31_01_2024-06-25.xbrl"));
    }

    #[test]
    fn decodes_shift_jis_when_utf8_fails() {
        // "百万円" in Shift_JIS
        let sjis: &[u8] = &[0x95, 0x53, 0x96, 0x9c, 0x89, 0x7e];
        assert_eq!(decode_bytes(sjis), "百万円");
    }

    #[test]
    fn decodes_utf8_first() {
        assert_eq!(decode_bytes("売上高".as_bytes()), "売上高");
    }
}
