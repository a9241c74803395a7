//! Retriever - 검색 모드 분기 + RRF 통합
//!
//! 벡터 검색(LanceDB)과 BM25 키워드 검색(FTS5 미러)을 가중 RRF로 통합합니다.
//! ref: https://www.elastic.co/blog/hybrid-search-rrf
//!
//! 렉시컬 미러가 비어 있으면 BM25/Hybrid 모드는 Vector 모드로 대체됩니다.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

use super::chunker::Chunk;
use super::index::IndexStore;
use super::lexical::LexicalMirror;

/// RRF 상수 (높은 순위에 더 많은 가중치)
const RRF_K: f64 = 60.0;

/// 각 랭킹의 가중치 (동일 가중)
const VECTOR_WEIGHT: f64 = 0.5;
const LEXICAL_WEIGHT: f64 = 0.5;

/// 기본 검색 개수
pub const DEFAULT_K: usize = 3;

// ============================================================================
// Types
// ============================================================================

/// 검색 모드
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// 벡터 유사도
    #[default]
    Vector,
    /// BM25 키워드
    Bm25,
    /// 벡터 + BM25 RRF 통합
    Hybrid,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Vector => write!(f, "vector"),
            RetrievalMode::Bm25 => write!(f, "bm25"),
            RetrievalMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for RetrievalMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(RetrievalMode::Vector),
            "bm25" => Ok(RetrievalMode::Bm25),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(RagError::InvalidConfig(format!(
                "unknown retrieval mode: {}",
                other
            ))),
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub mode: RetrievalMode,
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Vector,
            k: DEFAULT_K,
        }
    }
}

/// 통합 점수가 붙은 청크
#[derive(Debug, Clone)]
pub struct FusedChunk {
    pub chunk: Chunk,
    /// 가중 RRF 점수
    pub score: f64,
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색기 (인덱스 저장소 + 렉시컬 미러 참조)
pub struct Retriever<'a> {
    index: &'a IndexStore,
    lexical: &'a LexicalMirror,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a IndexStore, lexical: &'a LexicalMirror) -> Self {
        Self { index, lexical }
    }

    /// 모드별 검색 (결과는 최대 k개, 관련도 내림차순)
    pub async fn retrieve(&self, query: &str, mode: RetrievalMode, k: usize) -> Result<Vec<Chunk>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let effective = self.effective_mode(mode)?;

        let chunks = match effective {
            RetrievalMode::Vector => self.vector(query, k).await?,
            RetrievalMode::Bm25 => self.lexical(query, k)?,
            RetrievalMode::Hybrid => {
                let vector = self.vector(query, k).await?;
                let lexical = self.lexical(query, k)?;
                fuse_rankings(&vector, &lexical, k)
                    .into_iter()
                    .map(|f| f.chunk)
                    .collect()
            }
        };

        tracing::debug!(
            "Retrieved {} chunks (mode={}, requested={}, k={})",
            chunks.len(),
            effective,
            mode,
            k
        );

        Ok(chunks)
    }

    /// 미러가 비어 있으면 BM25/Hybrid → Vector
    fn effective_mode(&self, mode: RetrievalMode) -> Result<RetrievalMode> {
        if mode == RetrievalMode::Vector {
            return Ok(mode);
        }

        if self.lexical.is_empty()? {
            tracing::warn!(
                "Lexical mirror is empty; falling back from {} to vector retrieval",
                mode
            );
            return Ok(RetrievalMode::Vector);
        }

        Ok(mode)
    }

    async fn vector(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        let hits = self.index.similarity_search(query, k).await?;
        Ok(hits.into_iter().map(|h| h.chunk).collect())
    }

    fn lexical(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        let hits = self.lexical.search(query, k)?;
        Ok(hits.into_iter().map(|h| h.chunk).collect())
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// 가중 RRF (Reciprocal Rank Fusion)
///
/// RRF Score = Σ weight / (60 + rank), rank는 1부터 시작합니다.
/// 같은 `(text, source)`는 하나로 합쳐 점수를 누적하고,
/// 동점은 처음 등장한 순서(벡터 목록 먼저)를 유지합니다.
pub fn fuse_rankings(vector: &[Chunk], lexical: &[Chunk], k: usize) -> Vec<FusedChunk> {
    let mut fused: Vec<FusedChunk> = Vec::new();

    let rankings = [(vector, VECTOR_WEIGHT), (lexical, LEXICAL_WEIGHT)];
    for (ranking, weight) in rankings {
        for (rank, chunk) in ranking.iter().enumerate() {
            let contribution = weight / (RRF_K + rank as f64 + 1.0);

            match fused
                .iter_mut()
                .find(|f| f.chunk.text == chunk.text && f.chunk.source() == chunk.source())
            {
                Some(existing) => existing.score += contribution,
                None => fused.push(FusedChunk {
                    chunk: chunk.clone(),
                    score: contribution,
                }),
            }
        }
    }

    // sort_by는 안정 정렬
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(k);
    fused
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use crate::knowledge::chunker::source_metadata;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn chunk(text: &str, source: &str) -> Chunk {
        Chunk::new(text, source_metadata(source))
    }

    #[test]
    fn test_rrf_score_calculation() {
        let fused = fuse_rankings(&[chunk("a", "x")], &[], 3);
        // 1위: 0.5 / (60 + 1)
        assert!((fused[0].score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_fusion_accumulates_duplicates() {
        let vector = vec![chunk("a", "x"), chunk("b", "x"), chunk("c", "x")];
        let lexical = vec![chunk("c", "x"), chunk("d", "x")];

        let fused = fuse_rankings(&vector, &lexical, 10);
        let texts: Vec<&str> = fused.iter().map(|f| f.chunk.text.as_str()).collect();

        // c는 두 목록에 모두 있어 최상위
        assert_eq!(texts, vec!["c", "a", "b", "d"]);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_fusion_dedup_key_includes_source() {
        let fused = fuse_rankings(&[chunk("same", "x")], &[chunk("same", "y")], 10);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_fusion_ties_keep_first_appearance() {
        // 같은 순위 → 같은 점수 → 벡터 목록이 먼저
        let fused = fuse_rankings(&[chunk("v", "x")], &[chunk("l", "x")], 10);
        assert_eq!(fused[0].chunk.text, "v");
        assert_eq!(fused[1].chunk.text, "l");
    }

    #[test]
    fn test_fusion_respects_k_and_is_deterministic() {
        let vector: Vec<Chunk> = (0..5).map(|i| chunk(&format!("v{}", i), "x")).collect();
        let lexical: Vec<Chunk> = (0..5).map(|i| chunk(&format!("l{}", i), "x")).collect();

        let first = fuse_rankings(&vector, &lexical, 3);
        let second = fuse_rankings(&vector, &lexical, 3);

        assert_eq!(first.len(), 3);
        let a: Vec<_> = first.iter().map(|f| f.chunk.clone()).collect();
        let b: Vec<_> = second.iter().map(|f| f.chunk.clone()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("BM25".parse::<RetrievalMode>().unwrap(), RetrievalMode::Bm25);
        assert_eq!(RetrievalMode::Hybrid.to_string(), "hybrid");
        assert!("dense".parse::<RetrievalMode>().is_err());
    }

    async fn populated(dir: &TempDir, with_mirror: bool) -> (IndexStore, LexicalMirror) {
        let index = IndexStore::open(
            &dir.path().join("vectors.lance"),
            Arc::new(LocalEmbedding::new(64).unwrap()),
            Duration::ZERO,
        )
        .await
        .unwrap();
        let lexical = LexicalMirror::new().unwrap();

        let chunks: Vec<Chunk> = (0..6)
            .map(|i| chunk(&format!("rust retrieval note number {}", i), "notes.md"))
            .collect();
        index.add(&chunks).await.unwrap();
        if with_mirror {
            lexical.append(&chunks).unwrap();
        }

        (index, lexical)
    }

    #[tokio::test]
    async fn test_k_bound_all_modes() {
        let dir = TempDir::new().unwrap();
        let (index, lexical) = populated(&dir, true).await;
        let retriever = Retriever::new(&index, &lexical);

        for mode in [RetrievalMode::Vector, RetrievalMode::Bm25, RetrievalMode::Hybrid] {
            let chunks = retriever.retrieve("rust retrieval", mode, 2).await.unwrap();
            assert_eq!(chunks.len(), 2, "mode {}", mode);
        }
    }

    #[tokio::test]
    async fn test_hybrid_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let (index, lexical) = populated(&dir, true).await;
        let retriever = Retriever::new(&index, &lexical);

        let first = retriever
            .retrieve("retrieval note", RetrievalMode::Hybrid, 3)
            .await
            .unwrap();
        let second = retriever
            .retrieve("retrieval note", RetrievalMode::Hybrid, 3)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_mirror_falls_back_to_vector() {
        let dir = TempDir::new().unwrap();
        let (index, lexical) = populated(&dir, false).await;
        let retriever = Retriever::new(&index, &lexical);

        let vector = retriever
            .retrieve("rust retrieval", RetrievalMode::Vector, 3)
            .await
            .unwrap();
        let bm25 = retriever
            .retrieve("rust retrieval", RetrievalMode::Bm25, 3)
            .await
            .unwrap();
        let hybrid = retriever
            .retrieve("rust retrieval", RetrievalMode::Hybrid, 3)
            .await
            .unwrap();

        assert_eq!(vector.len(), 3);
        assert_eq!(bm25, vector);
        assert_eq!(hybrid, vector);
    }
}
