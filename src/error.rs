//! 에러 타입 - RAG 엔진 에러 분류
//!
//! 외부 능력(임베딩, 완성 API, 벡터 인덱스)의 `anyhow` 에러는
//! 엔진 경계에서 아래 분류로 변환되며, 원인은 `source`로 보존됩니다.

use std::path::PathBuf;

use thiserror::Error;

/// RAG 엔진 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 지원하지 않는 문서 형식 (로더)
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// 임베딩 능력 호출 실패
    #[error("Embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    /// 완성 API용 자격 증명 없음/무효
    #[error("No usable credential: {0}")]
    Credential(String),

    /// 자격 증명이 있는 상태에서 완성 API 호출 실패
    #[error("Completion failed: {0}")]
    Completion(#[source] anyhow::Error),

    /// clear() 중 디렉토리 삭제 실패 (로그만 남기고 계속 진행)
    #[error("Failed to remove index storage at {path:?}: {source}")]
    StorageTeardown {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 설정 값 범위 오류
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 벡터 인덱스 엔진 에러
    #[error("Index store error: {0}")]
    Store(#[source] anyhow::Error),

    /// 렉시컬 미러(FTS5) 에러
    #[error("Lexical index error: {0}")]
    Lexical(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// 완성 API 에러 분류
    ///
    /// 클라이언트가 이미 `RagError`(예: 401 → Credential)를 반환했다면 그대로 유지하고,
    /// 그 외에는 `Completion`으로 감쌉니다.
    pub fn from_completion(err: anyhow::Error) -> Self {
        match err.downcast::<RagError>() {
            Ok(rag) => rag,
            Err(other) => RagError::Completion(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_completion_keeps_credential_error() {
        let err = anyhow::Error::new(RagError::Credential("invalid key".to_string()));
        assert!(matches!(
            RagError::from_completion(err),
            RagError::Credential(_)
        ));
    }

    #[test]
    fn test_from_completion_wraps_other_errors() {
        let err = anyhow::anyhow!("connection reset");
        let rag = RagError::from_completion(err);
        assert!(matches!(rag, RagError::Completion(_)));
        assert!(rag.to_string().contains("connection reset"));
    }
}
