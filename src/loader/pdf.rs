//! PDF 텍스트 추출
//!
//! pdf-extract 크레이트로 텍스트를 뽑고 페이지별로 나눕니다.

use std::io;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;

/// PDF에서 페이지별 텍스트 추출
///
/// (페이지 번호, 텍스트) 목록을 반환합니다. 페이지 번호는 1부터 시작하는 원래 위치이며,
/// 텍스트가 없는 페이지는 건너뛰어도 번호는 유지됩니다.
/// 읽기 실패와 손상된 PDF는 `Io` 에러입니다.
pub fn extract_pages(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path)?;

    let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to extract text from PDF {:?}: {}", path, e),
        )
    })?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pages(&text))
}

/// "--- Page 3 ---" 같은 페이지 구분 줄
fn page_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").ok())
        .as_ref()
}

/// 번호를 먼저 매기고 빈 페이지를 거름
fn numbered<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<(usize, String)> {
    parts
        .enumerate()
        .map(|(i, s)| (i + 1, s.trim().to_string()))
        .filter(|(_, s)| !s.is_empty())
        .collect()
}

/// 텍스트를 페이지별로 분리 (폼피드 → 구분 줄 → 전체 한 페이지)
fn split_pages(text: &str) -> Vec<(usize, String)> {
    let pages = numbered(text.split('\x0c'));
    if pages.len() > 1 {
        return pages;
    }

    if let Some(marker) = page_marker() {
        let pages = numbered(marker.split(text));
        if pages.len() > 1 {
            return pages;
        }
    }

    vec![(1, text.trim().to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    fn page(n: usize, text: &str) -> (usize, String) {
        (n, text.to_string())
    }

    #[test]
    fn test_split_pages_with_formfeed() {
        let pages = split_pages("Page 1 content\x0cPage 2 content\x0c\x0cPage 4 content\x0c");
        assert_eq!(
            pages,
            vec![
                page(1, "Page 1 content"),
                page(2, "Page 2 content"),
                page(4, "Page 4 content"),
            ]
        );
    }

    #[test]
    fn test_blank_page_keeps_later_numbers() {
        let pages = split_pages("cover\x0c   \n \x0cbody\x0cappendix");
        assert_eq!(
            pages,
            vec![page(1, "cover"), page(3, "body"), page(4, "appendix")]
        );
    }

    #[test]
    fn test_split_pages_with_marker_lines() {
        let pages = split_pages("intro text\n--- Page 2 ---\nsecond page\n=== 3 ===\nthird");
        assert_eq!(
            pages,
            vec![page(1, "intro text"), page(2, "second page"), page(3, "third")]
        );
    }

    #[test]
    fn test_split_pages_no_separator() {
        assert_eq!(split_pages("  just one page  "), vec![page(1, "just one page")]);
    }

    #[test]
    fn test_extract_missing_file_is_io_error() {
        assert!(matches!(
            extract_pages(Path::new("/nonexistent/file.pdf")),
            Err(RagError::Io(_))
        ));
    }
}
