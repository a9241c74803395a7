//! Knowledge Manager - 오케스트레이터
//!
//! 인덱스 저장소와 렉시컬 미러의 수명을 소유하고, 경계 레이어(CLI)에
//! ingest / list_sources / delete_source / clear / chat 다섯 연산을 제공합니다.
//!
//! ## 동시성
//! - 변경 연산(ingest, delete_source, clear)은 인스턴스당 하나의 쓰기 잠금으로 직렬화
//! - 읽기 연산(검색, 목록, chat)은 읽기 잠금으로 서로 병렬, clear와는 배타
//! - 임베딩은 쓰기 잠금을 잡기 전에 끝냅니다
//! - 인덱스 삽입 + 미러 추가는 분리된 태스크에서 실행되어, 호출자가 취소되어도
//!   한쪽 저장소에만 배치가 들어가는 일이 없습니다. 미러 추가가 실패하면 삽입한
//!   레코드를 ID로 되돌립니다
//! - chat은 모드 결정과 검색 동안만 읽기 잠금을 잡고, 모델 호출 전에 놓습니다

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::answer::{AnswerEngine, AnswerResult, ChatRequest};
use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::{
    split, Chunk, ChunkConfig, IndexStore, LexicalMirror, Metadata, VectorEntry, SOURCE_KEY,
};
use crate::llm::{ChatMessage, CompletionProvider};
use crate::session::SessionStore;

// ============================================================================
// Types
// ============================================================================

/// 출처 문서 요약 (저장하지 않고 매번 계산)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub count: usize,
}

/// 관리자 통계
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// 영속 인덱스 청크 수
    pub vector_count: usize,
    /// 이번 프로세스에서 미러에 추가된 청크 수
    pub lexical_count: usize,
    /// 출처 문서 수
    pub source_count: usize,
}

// ============================================================================
// KnowledgeManager
// ============================================================================

/// 지식 관리자
pub struct KnowledgeManager {
    config: RagConfig,
    index: Arc<IndexStore>,
    lexical: Arc<LexicalMirror>,
    completion: Arc<dyn CompletionProvider>,
    sessions: SessionStore,
    gate: Arc<RwLock<()>>,
}

impl KnowledgeManager {
    /// 관리자 열기
    ///
    /// 데이터 디렉토리와 벡터 인덱스를 생성하거나 재사용합니다.
    /// 렉시컬 미러는 항상 빈 상태로 시작합니다.
    pub async fn open(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        config.validate()?;

        if !config.data_dir.exists() {
            tokio::fs::create_dir_all(&config.data_dir).await?;
        }

        let index = IndexStore::open(&config.vectors_path(), embedder, config.clear_settle_delay())
            .await?;
        let lexical = LexicalMirror::new()?;
        let sessions = SessionStore::new(config.session.clone());

        tracing::info!("Knowledge manager ready: {:?}", config.data_dir);

        Ok(Self {
            config,
            index: Arc::new(index),
            lexical: Arc::new(lexical),
            completion,
            sessions,
            gate: Arc::new(RwLock::new(())),
        })
    }

    /// 현재 설정
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// 데이터 디렉토리
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// 설정 기본값으로 채운 채팅 요청
    pub fn request(&self, query: impl Into<String>) -> ChatRequest {
        ChatRequest {
            query: query.into(),
            credential: None,
            completion: self.config.completion.clone(),
            mode: self.config.retrieval.mode,
            k: self.config.retrieval.k,
        }
    }

    // ========================================================================
    // Mutating operations
    // ========================================================================

    /// 문서 추가
    ///
    /// 분할 → 임베딩 → (쓰기 잠금) 인덱스 삽입 + 미러 추가.
    /// 빈 문서는 저장소를 건드리지 않고 빈 결과를 반환합니다.
    ///
    /// # Returns
    /// 저장된 청크 (미리보기용)
    pub async fn ingest(
        &self,
        text: &str,
        metadata: &Metadata,
        chunk_config: &ChunkConfig,
    ) -> Result<Vec<Chunk>> {
        let chunks = split(text, metadata, chunk_config)?;
        if chunks.is_empty() {
            tracing::warn!("No chunks generated for document: {:?}", metadata);
            return Ok(vec![]);
        }

        if chunks.iter().any(|c| c.source().is_empty()) {
            return Err(RagError::InvalidConfig(
                "document metadata must include a non-empty `source`".to_string(),
            ));
        }

        // 잠금 밖에서 임베딩
        let entries = self.index.embed_chunks(&chunks).await?;

        let index = Arc::clone(&self.index);
        let lexical = Arc::clone(&self.lexical);
        let gate = Arc::clone(&self.gate);
        let batch = chunks.clone();

        let write = tokio::spawn(async move {
            let _guard = gate.write_owned().await;
            commit_batch(&index, &entries, || lexical.append(&batch)).await
        });

        let appended = write
            .await
            .map_err(|e| RagError::Store(anyhow::anyhow!("Ingest task failed: {}", e)))??;

        tracing::info!(
            "Ingested {} chunks from {} (size={}, overlap={}, method={:?})",
            appended,
            chunks[0].source(),
            chunk_config.chunk_size,
            chunk_config.chunk_overlap,
            chunk_config.method
        );

        Ok(chunks)
    }

    /// 출처 삭제 (인덱스 저장소만, 미러는 정리하지 않음)
    pub async fn delete_source(&self, source: &str) -> Result<usize> {
        let _guard = self.gate.write().await;
        let deleted = self.index.delete_by_source(source).await?;

        tracing::info!("Deleted {} chunks for source {}", deleted, source);
        Ok(deleted)
    }

    /// 전체 초기화 (인덱스 저장소 → 미러 순)
    pub async fn clear(&self) -> Result<()> {
        let index = Arc::clone(&self.index);
        let lexical = Arc::clone(&self.lexical);
        let gate = Arc::clone(&self.gate);

        let task = tokio::spawn(async move {
            let _guard = gate.write_owned().await;
            index.clear().await?;
            lexical.reset()
        });

        task.await
            .map_err(|e| RagError::Store(anyhow::anyhow!("Clear task failed: {}", e)))??;

        tracing::info!("Knowledge base cleared");
        Ok(())
    }

    // ========================================================================
    // Read operations
    // ========================================================================

    /// 출처별 청크 수 (처음 등장한 순서)
    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        let _guard = self.gate.read().await;
        let metadata = self.index.list_metadata().await?;

        let mut summaries: Vec<SourceSummary> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for meta in metadata {
            let source = meta
                .get(SOURCE_KEY)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            match positions.get(&source) {
                Some(&i) => summaries[i].count += 1,
                None => {
                    positions.insert(source.clone(), summaries.len());
                    summaries.push(SourceSummary { source, count: 1 });
                }
            }
        }

        Ok(summaries)
    }

    /// 질의 응답
    pub async fn chat(&self, request: &ChatRequest) -> Result<AnswerResult> {
        self.answer(request, &[]).await
    }

    /// 세션 기록을 사용하는 질의 응답
    ///
    /// 기록은 normal_chat 모드 프롬프트에만 들어갑니다. 성공한 문답은 세션에 추가됩니다.
    pub async fn chat_in_session(
        &self,
        session_id: &str,
        request: &ChatRequest,
    ) -> Result<AnswerResult> {
        let history = self.sessions.history(session_id)?;
        let result = self.answer(request, &history).await?;

        self.sessions.append(
            session_id,
            [
                ChatMessage::user(request.query.clone()),
                ChatMessage::assistant(result.answer.clone()),
            ],
        )?;

        Ok(result)
    }

    /// 세션 종료
    pub fn end_session(&self, session_id: &str) -> Result<bool> {
        self.sessions.remove(session_id)
    }

    /// 통계
    pub async fn stats(&self) -> Result<ManagerStats> {
        let (vector_count, lexical_count) = {
            let _guard = self.gate.read().await;
            (self.index.count().await?, self.lexical.len()?)
        };
        let source_count = self.list_sources().await?.len();

        Ok(ManagerStats {
            vector_count,
            lexical_count,
            source_count,
        })
    }

    /// 검색까지만 읽기 잠금 안에서, 모델 호출은 잠금 밖에서
    async fn answer(&self, request: &ChatRequest, history: &[ChatMessage]) -> Result<AnswerResult> {
        let engine = self.engine();
        let plan = {
            let _guard = self.gate.read().await;
            engine.prepare(request, history).await?
        };
        engine.finish(plan, request).await
    }

    fn engine(&self) -> AnswerEngine<'_> {
        AnswerEngine::new(
            &self.index,
            &self.lexical,
            self.completion.as_ref(),
            &self.config.answer,
        )
    }
}

/// 인덱스 삽입 후 미러 추가
///
/// 미러 추가가 실패하면 방금 삽입한 레코드를 삭제하고 미러 에러를 반환합니다.
async fn commit_batch<F>(index: &IndexStore, entries: &[VectorEntry], append: F) -> Result<usize>
where
    F: FnOnce() -> Result<usize>,
{
    index.insert(entries).await?;

    match append() {
        Ok(appended) => Ok(appended),
        Err(err) => {
            let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
            match index.delete_ids(&ids).await {
                Ok(removed) => {
                    tracing::warn!("Mirror append failed; rolled back {} vectors", removed)
                }
                Err(rollback) => tracing::error!(
                    "Mirror append failed and {} vectors could not be rolled back: {}",
                    ids.len(),
                    rollback
                ),
            }
            Err(err)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
