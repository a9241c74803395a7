//! Knowledge 모듈 - 청킹, 인덱스 저장소, 렉시컬 미러, 검색기
//!
//! - Chunker: recursive / fixed 분할, 정확한 문자 오버랩
//! - LanceDB: 영속 벡터 인덱스 (유사도 검색)
//! - SQLite FTS5: 세션 수명 인메모리 BM25 미러
//! - Retriever: Vector / BM25 / Hybrid(가중 RRF) 검색

mod chunker;
mod index;
mod lance;
mod lexical;
mod retriever;
pub mod tokenize;
mod vector;

// Re-exports
pub use chunker::{
    chunker_for, source_metadata, split, Chunk, ChunkConfig, Chunker, Metadata, SeparatorChunker,
    SplitMethod, SOURCE_KEY,
};
pub use index::IndexStore;
pub use lance::LanceVectorStore;
pub use lexical::{LexicalHit, LexicalMirror};
pub use retriever::{
    fuse_rankings, FusedChunk, RetrievalConfig, RetrievalMode, Retriever, DEFAULT_K,
};
pub use vector::{VectorEntry, VectorHit, VectorStore};
