//! Lexical Mirror - 세션 수명 BM25 키워드 인덱스
//!
//! 인메모리 SQLite FTS5 테이블에 청크 원문을 보관하고 `bm25()`로 점수를 매깁니다.
//! source: https://www.sqlite.org/fts5.html#the_bm25_function
//!
//! 이 인덱스는 프로세스 시작 시 비어 있으며, 영속 벡터 인덱스에서 다시 채우지 않습니다.
//! `delete_source`도 이 미러를 정리하지 않습니다. 따라서 재시작 이후나 출처 삭제 이후에는
//! BM25/Hybrid 검색이 벡터 인덱스와 다른(오래되었거나 빈) 텍스트 집합을 보게 됩니다.
//! 관찰된 동작을 그대로 유지하는 것이며, 재동기화는 하지 않습니다.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::error::{RagError, Result};

use super::chunker::{Chunk, Metadata};
use super::tokenize;

// ============================================================================
// Types
// ============================================================================

/// BM25 검색 결과
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk: Chunk,
    /// BM25 스코어 (높을수록 관련성 높음)
    pub score: f64,
}

// ============================================================================
// LexicalMirror
// ============================================================================

/// 인메모리 렉시컬 미러
pub struct LexicalMirror {
    conn: Arc<Mutex<Connection>>,
}

impl LexicalMirror {
    /// 빈 미러 생성
    pub fn new() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        // body: 토크나이즈된 검색용 본문, 나머지는 원본 보관용
        conn.execute(
            "CREATE VIRTUAL TABLE chunks_fts USING fts5(
                body,
                text UNINDEXED,
                metadata UNINDEXED
            )",
            [],
        )?;

        tracing::debug!("Lexical mirror initialized (in-memory FTS5)");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::Store(anyhow::anyhow!("Lock error: {}", e)))
    }

    /// 청크 추가 (삽입 순서 유지, 한 트랜잭션)
    pub fn append(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO chunks_fts (body, text, metadata) VALUES (?1, ?2, ?3)")?;

            for chunk in chunks {
                let metadata = serde_json::to_string(&chunk.metadata)
                    .map_err(|e| RagError::Store(e.into()))?;
                stmt.execute(params![
                    tokenize::index_body(&chunk.text),
                    chunk.text,
                    metadata
                ])?;
            }
        }
        tx.commit()?;

        Ok(chunks.len())
    }

    /// 저장된 청크 수
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks_fts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// BM25 키워드 검색
    ///
    /// 질의 텀 중 하나라도 포함한 청크를 BM25 내림차순으로 반환합니다.
    /// 동점은 삽입 순서로 정렬합니다.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let match_query = build_match_query(query);
        if match_query.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT text, metadata, bm25(chunks_fts) AS score
            FROM chunks_fts
            WHERE chunks_fts MATCH ?1
            ORDER BY score, rowid
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![match_query, k as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(text, metadata, score)| {
                let metadata: Metadata =
                    serde_json::from_str(&metadata).map_err(|e| RagError::Store(e.into()))?;
                Ok(LexicalHit {
                    chunk: Chunk::new(text, metadata),
                    // FTS5 bm25()는 음수 (작을수록 좋음)
                    score: -score,
                })
            })
            .collect()
    }

    /// 전체 비우기
    pub fn reset(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM chunks_fts", [])?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// FTS5 MATCH 질의 생성
///
/// 고유 텀을 큰따옴표로 감싸 OR로 연결합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_match_query(query: &str) -> String {
    let mut seen = Vec::new();
    for term in tokenize::terms(query) {
        if !seen.contains(&term) {
            seen.push(term);
        }
    }

    seen.iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::source_metadata;

    fn chunk(text: &str, source: &str) -> Chunk {
        Chunk::new(text, source_metadata(source))
    }

    #[test]
    fn test_empty_mirror() {
        let mirror = LexicalMirror::new().unwrap();
        assert!(mirror.is_empty().unwrap());
        assert!(mirror.search("anything", 3).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_search_ranks_term_overlap() {
        let mirror = LexicalMirror::new().unwrap();
        mirror
            .append(&[
                chunk("Python is great for data science", "py.md"),
                chunk("Rust is a systems programming language", "rust.md"),
                chunk("Rust programming with cargo and rust analyzer", "rust.md"),
            ])
            .unwrap();

        assert_eq!(mirror.len().unwrap(), 3);

        let hits = mirror.search("rust programming", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.source() == "rust.md"));
        assert!(hits[0].score >= hits[1].score);

        let hits = mirror.search("data", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source(), "py.md");
    }

    #[test]
    fn test_search_respects_k() {
        let mirror = LexicalMirror::new().unwrap();
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk(&format!("shared term number {}", i), "n.md"))
            .collect();
        mirror.append(&chunks).unwrap();

        assert_eq!(mirror.search("shared", 3).unwrap().len(), 3);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mirror = LexicalMirror::new().unwrap();
        mirror
            .append(&[chunk("alpha beta", "1.md"), chunk("alpha beta", "2.md")])
            .unwrap();

        let hits = mirror.search("alpha", 2).unwrap();
        assert_eq!(hits[0].chunk.source(), "1.md");
        assert_eq!(hits[1].chunk.source(), "2.md");
    }

    #[test]
    fn test_cjk_terms_match() {
        let mirror = LexicalMirror::new().unwrap();
        mirror
            .append(&[
                chunk("知识库中的文档会被切分", "zh.md"),
                chunk("completely unrelated", "en.md"),
            ])
            .unwrap();

        let hits = mirror.search("文档", 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "知识库中的文档会被切分");
    }

    #[test]
    fn test_query_special_characters_are_safe() {
        let mirror = LexicalMirror::new().unwrap();
        mirror.append(&[chunk("quoted \"value\" here", "q.md")]).unwrap();

        assert_eq!(mirror.search("\"value\" AND (NOT here*", 3).unwrap().len(), 1);
        assert!(mirror.search("!!! ???", 3).unwrap().is_empty());
    }

    #[test]
    fn test_reset() {
        let mirror = LexicalMirror::new().unwrap();
        mirror.append(&[chunk("some text", "a.md")]).unwrap();
        mirror.reset().unwrap();
        assert!(mirror.is_empty().unwrap());
        mirror.reset().unwrap();
        assert!(mirror.is_empty().unwrap());
    }

    #[test]
    fn test_build_match_query() {
        assert_eq!(build_match_query("Hello hello world"), "\"hello\" OR \"world\"");
        assert_eq!(build_match_query("  "), "");
    }
}
