//! 텀 추출 - 렉시컬 미러와 로컬 임베딩이 공유하는 토크나이저
//!
//! 영문/숫자/한글은 연속된 단어 문자 단위로, 한자와 가나는 글자 하나를
//! 하나의 텀으로 취급합니다. 공백 없는 중국어/일본어 문서도 텀 단위로 나뉩니다.

/// CJK 표의문자/가나 여부
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // 히라가나, 가타카나
        | 0x3400..=0x4DBF    // CJK 확장 A
        | 0x4E00..=0x9FFF    // CJK 통합 한자
        | 0xF900..=0xFAFF    // CJK 호환 한자
        | 0x20000..=0x2FFFF) // CJK 확장 B 이후
}

/// 텍스트를 소문자 텀 목록으로 분해
pub fn terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            terms.push(c.to_string());
        } else if c.is_alphanumeric() || c == '_' {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        terms.push(current);
    }

    terms
}

/// FTS5 인덱싱용 본문 (텀을 공백으로 연결)
pub fn index_body(text: &str) -> String {
    terms(text).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_latin() {
        assert_eq!(
            terms("Rust's borrow-checker, v2!"),
            vec!["rust", "s", "borrow", "checker", "v2"]
        );
    }

    #[test]
    fn test_terms_cjk_split_per_char() {
        assert_eq!(terms("知识库abc"), vec!["知", "识", "库", "abc"]);
    }

    #[test]
    fn test_terms_hangul_kept_as_word() {
        assert_eq!(terms("하이브리드 검색"), vec!["하이브리드", "검색"]);
    }

    #[test]
    fn test_terms_empty() {
        assert!(terms("  ... ").is_empty());
        assert_eq!(index_body(""), "");
    }
}
