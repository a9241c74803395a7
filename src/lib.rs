//! ragchat - 지식베이스 기반 RAG 채팅 엔진
//!
//! 문서를 청크로 나눠 LanceDB 벡터 인덱스와 인메모리 FTS5 BM25 미러에 저장하고,
//! 질의 시 Vector / BM25 / Hybrid(가중 RRF) 검색 결과로 근거 기반 답변을 생성합니다.
//! 지식베이스가 비어 있으면 일반 대화 모드로 답합니다.

pub mod answer;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod loader;
pub mod manager;
pub mod session;

// Re-exports
pub use answer::{AnswerMode, AnswerResult, ChatRequest, REFUSAL_PHRASE};
pub use config::{resolve_credential, RagConfig};
pub use embedding::{create_embedder, EmbeddingProvider, LocalEmbedding, OpenAiEmbedding};
pub use error::{RagError, Result};
pub use knowledge::{
    split, Chunk, ChunkConfig, IndexStore, LexicalMirror, Metadata, RetrievalMode, SplitMethod,
};
pub use llm::{ChatMessage, CompletionConfig, CompletionProvider, OpenAiCompatibleClient};
pub use loader::{collect_paths, load_document, LoadedDocument};
pub use manager::{KnowledgeManager, SourceSummary};
pub use session::SessionStore;
