//! Vector Store - 벡터 인덱스 트레이트 및 레코드 타입
//!
//! 영속 벡터 인덱스 엔진이 제공해야 하는 능력:
//! 추가, 유사도 질의, 출처 필터 삭제, 메타데이터 전체 열거.

use anyhow::Result;
use async_trait::async_trait;

use super::chunker::{Chunk, Metadata};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 저장소가 부여한 레코드 ID
    pub id: String,
    /// 출처 문서 식별자 (metadata.source)
    pub source: String,
    /// 청크 텍스트
    pub text: String,
    /// 청크 메타데이터
    pub metadata: Metadata,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

impl VectorEntry {
    /// 청크와 임베딩으로 엔트리 생성 (새 ID 부여)
    pub fn new(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: chunk.source().to_string(),
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            embedding,
        }
    }
}

/// 벡터 검색 결과
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// 벡터 거리 (작을수록 가까움)
    pub distance: f32,
}

impl VectorHit {
    /// 거리를 유사도로 변환 (0.0 ~ 1.0)
    pub fn similarity(&self) -> f32 {
        1.0 / (1.0 + self.distance)
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입 (배치 단위 커밋)
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 벡터 검색 (가까운 순)
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    /// 저장된 모든 레코드의 메타데이터 (텍스트 제외)
    async fn list_metadata(&self) -> Result<Vec<Metadata>>;

    /// source가 정확히 일치하는 레코드 삭제
    async fn delete_by_source(&self, source: &str) -> Result<usize>;

    /// 레코드 ID로 삭제 (배치 되돌리기용)
    async fn delete_ids(&self, ids: &[String]) -> Result<usize>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::source_metadata;

    #[test]
    fn test_entry_takes_source_from_metadata() {
        let chunk = Chunk::new("hello", source_metadata("a.md"));
        let entry = VectorEntry::new(&chunk, vec![0.0; 4]);
        assert_eq!(entry.source, "a.md");
        assert_eq!(entry.text, "hello");
        assert!(!entry.id.is_empty());
    }

    #[test]
    fn test_similarity_monotonic() {
        let chunk = Chunk::new("x", source_metadata("a.md"));
        let near = VectorHit {
            chunk: chunk.clone(),
            distance: 0.0,
        };
        let far = VectorHit {
            chunk,
            distance: 3.0,
        };
        assert!((near.similarity() - 1.0).abs() < 1e-6);
        assert!(near.similarity() > far.similarity());
    }
}
