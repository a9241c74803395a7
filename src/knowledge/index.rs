//! Index Store - 임베딩 능력 + 영속 벡터 인덱스
//!
//! 청크는 추가 시점에 정확히 한 번 임베딩됩니다. 임베딩은 저장소 쓰기 전에
//! 끝나야 하므로 [`IndexStore::embed_chunks`]와 [`IndexStore::insert`]가 분리되어 있습니다.
//! 관리자는 전자를 잠금 밖에서, 후자를 쓰기 잠금 안에서 호출합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::{Chunk, Metadata};
use super::lance::LanceVectorStore;
use super::vector::{VectorEntry, VectorHit, VectorStore};

/// 인덱스 저장소
pub struct IndexStore {
    embedder: Arc<dyn EmbeddingProvider>,
    path: PathBuf,
    dimension: usize,
    settle_delay: Duration,
    // clear() 동안 핸들을 놓았다가 다시 열기 위해 Option
    vectors: RwLock<Option<LanceVectorStore>>,
}

impl IndexStore {
    /// 저장소 열기 (디렉토리가 있으면 재사용)
    ///
    /// # Arguments
    /// * `path` - 벡터 인덱스 디렉토리 (`vectors.lance`)
    /// * `embedder` - 임베딩 능력
    /// * `settle_delay` - clear()에서 핸들 해제 후 재사용 전 대기 시간
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        settle_delay: Duration,
    ) -> Result<Self> {
        let dimension = embedder.dimension();
        let vectors = LanceVectorStore::open(path, dimension)
            .await
            .map_err(RagError::Store)?;

        tracing::info!(
            "Index store opened at {:?} (embedder={}, dim={})",
            path,
            embedder.name(),
            dimension
        );

        Ok(Self {
            embedder,
            path: path.to_path_buf(),
            dimension,
            settle_delay,
            vectors: RwLock::new(Some(vectors)),
        })
    }

    /// 청크 임베딩 (저장하지 않음)
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<VectorEntry>> {
        if chunks.is_empty() {
            return Ok(vec![]);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(RagError::Embedding)?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(anyhow::anyhow!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(RagError::Embedding(anyhow::anyhow!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.len()
            )));
        }

        Ok(chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry::new(chunk, embedding))
            .collect())
    }

    /// 임베딩된 엔트리 저장 (한 배치 = 한 커밋)
    pub async fn insert(&self, entries: &[VectorEntry]) -> Result<usize> {
        let guard = self.vectors.read().await;
        let inserted = open_store(&guard)?
            .insert_batch(entries)
            .await
            .map_err(RagError::Store)?;

        tracing::debug!("Inserted {} vectors", inserted);
        Ok(inserted)
    }

    /// 청크 추가 (임베딩 후 저장)
    pub async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        let entries = self.embed_chunks(chunks).await?;
        self.insert(&entries).await
    }

    /// 질의와 가장 가까운 청크 k개 (가까운 순)
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(RagError::Embedding)?;

        let guard = self.vectors.read().await;
        open_store(&guard)?
            .search(&query_embedding, k)
            .await
            .map_err(RagError::Store)
    }

    /// 모든 레코드의 메타데이터 (텍스트 제외)
    pub async fn list_metadata(&self) -> Result<Vec<Metadata>> {
        let guard = self.vectors.read().await;
        open_store(&guard)?
            .list_metadata()
            .await
            .map_err(RagError::Store)
    }

    /// 출처가 정확히 일치하는 레코드 전부 삭제 (없으면 no-op)
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let guard = self.vectors.read().await;
        open_store(&guard)?
            .delete_by_source(source)
            .await
            .map_err(RagError::Store)
    }

    /// 레코드 ID로 삭제
    pub async fn delete_ids(&self, ids: &[String]) -> Result<usize> {
        let guard = self.vectors.read().await;
        open_store(&guard)?
            .delete_ids(ids)
            .await
            .map_err(RagError::Store)
    }

    /// 저장된 레코드 수
    pub async fn count(&self) -> Result<usize> {
        let guard = self.vectors.read().await;
        open_store(&guard)?.count().await.map_err(RagError::Store)
    }

    /// 전체 삭제
    ///
    /// 핸들을 놓고 디렉토리를 지운 뒤, 잠시 기다렸다가 빈 저장소를 다시 엽니다.
    /// 디렉토리 삭제 실패(`StorageTeardown`)는 로그만 남기고 테이블을 논리적으로 비웁니다.
    /// 이미 비어 있어도 안전합니다.
    pub async fn clear(&self) -> Result<()> {
        let mut guard = self.vectors.write().await;

        // 핸들 해제
        drop(guard.take());

        let removed = match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(source) => {
                let err = RagError::StorageTeardown {
                    path: self.path.clone(),
                    source,
                };
                tracing::warn!("{}", err);
                false
            }
        };

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let store = LanceVectorStore::open(&self.path, self.dimension)
            .await
            .map_err(RagError::Store)?;

        if !removed {
            store.drop_all().await.map_err(RagError::Store)?;
        }

        *guard = Some(store);

        tracing::info!("Index store cleared: {:?}", self.path);
        Ok(())
    }
}

/// 열린 저장소 참조 (clear() 중 재오픈 실패 시 에러)
fn open_store(slot: &Option<LanceVectorStore>) -> Result<&LanceVectorStore> {
    slot.as_ref()
        .ok_or_else(|| RagError::Store(anyhow::anyhow!("Vector index is not open")))
}

// ============================================================================
// Tests
// ============================================================================
