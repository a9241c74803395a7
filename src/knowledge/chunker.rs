//! Text Chunking Module
//!
//! 로드된 문서 텍스트를 겹침(overlap)이 있는 청크로 분할합니다.
//!
//! - `recursive`: 문단 → 줄 → 문장부호(전각 포함) → 공백 → 문자 순으로 경계를 찾아 분할
//! - `fixed`: 줄바꿈만 사용, 긴 줄은 문자 단위로 자름
//!
//! 모든 청크는 원문의 연속된 구간이며, 길이(문자 수)는 `chunk_size` 이하입니다.
//! 청크 i+1은 청크 i의 마지막 `chunk_overlap` 문자로 시작합니다.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagError, Result};

/// 청크 메타데이터 (반드시 `source` 포함)
pub type Metadata = serde_json::Map<String, Value>;

/// 출처 메타데이터 키
pub const SOURCE_KEY: &str = "source";

/// 재귀 분할 구분자 (우선순위 순, 마지막 ""는 문자 단위)
const RECURSIVE_SEPARATORS: &[&str] = &[
    "\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", " ", "",
];

/// 고정 분할 구분자
const FIXED_SEPARATORS: &[&str] = &["\n", ""];

// ============================================================================
// Chunk
// ============================================================================

/// 인덱싱 단위 청크
///
/// 생성 후 변경되지 않습니다. 식별자는 인덱스 저장소가 부여합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// 출처 문서 식별자 (없으면 빈 문자열)
    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// `source`만 담은 메타데이터 생성
pub fn source_metadata(source: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(SOURCE_KEY.to_string(), Value::String(source.to_string()));
    metadata
}

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 분할 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// 경계 인식 재귀 분할
    #[default]
    Recursive,
    /// 줄바꿈 기준 고정 분할
    Fixed,
}

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 연속 청크 간 오버랩 (문자 수)
    pub chunk_overlap: usize,
    /// 분할 방식
    pub method: SplitMethod,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            method: SplitMethod::Recursive,
        }
    }
}

impl ChunkConfig {
    pub const MIN_CHUNK_SIZE: usize = 50;
    pub const MAX_CHUNK_SIZE: usize = 4000;
    pub const MAX_CHUNK_OVERLAP: usize = 500;

    /// 경계 레이어에서 허용하는 범위 검증
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_CHUNK_SIZE..=Self::MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(RagError::InvalidConfig(format!(
                "chunk_size must be within {}..={} (got {})",
                Self::MIN_CHUNK_SIZE,
                Self::MAX_CHUNK_SIZE,
                self.chunk_size
            )));
        }
        if self.chunk_overlap > Self::MAX_CHUNK_OVERLAP {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap must be at most {} (got {})",
                Self::MAX_CHUNK_OVERLAP,
                self.chunk_overlap
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 (시작 문자 위치, 청크 텍스트) 목록으로 분할
    fn split_text(&self, text: &str) -> Vec<(usize, String)>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 텍스트를 청크로 분할하고 메타데이터를 부여
    ///
    /// 각 청크는 `metadata`를 그대로 상속하고 `chunk_index`, `start_index`를 추가합니다.
    fn split(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(index, (start, body))| {
                let mut meta = metadata.clone();
                meta.insert("chunk_index".to_string(), Value::from(index));
                meta.insert("start_index".to_string(), Value::from(start));
                Chunk::new(body, meta)
            })
            .collect()
    }
}

// ============================================================================
// SeparatorChunker
// ============================================================================

/// 구분자 목록 기반 청커 (recursive / fixed 공통 구현)
pub struct SeparatorChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &'static [&'static str],
    name: &'static str,
}

impl SeparatorChunker {
    /// 재귀 분할 청커
    pub fn recursive(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, RECURSIVE_SEPARATORS, "recursive")
    }

    /// 고정 분할 청커
    pub fn fixed(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, FIXED_SEPARATORS, "fixed")
    }

    fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: &'static [&'static str],
        name: &'static str,
    ) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "require 0 <= chunk_overlap < chunk_size (got overlap={}, size={})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
            name,
        })
    }

    /// 본문 예산: 오버랩을 붙여도 chunk_size를 넘지 않도록
    fn budget(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Chunker for SeparatorChunker {
    fn split_text(&self, text: &str) -> Vec<(usize, String)> {
        if text.trim().is_empty() {
            return vec![];
        }

        let budget = self.budget();

        // 1. 구분자 우선순위로 예산 이하 조각 생성
        let mut pieces = Vec::new();
        split_pieces(text, 0..text.len(), self.separators, budget, &mut pieces);

        // 2. 인접 조각 병합
        let bodies = merge_pieces(text, pieces, budget);

        // 3. 오버랩 적용 (본문 앞의 원문 문자를 그대로 가져옴)
        let mut chunks = Vec::with_capacity(bodies.len());
        let mut body_char_start = 0;

        for body in bodies {
            let overlap_start = back_chars(text, body.start, self.chunk_overlap);
            let overlap_chars = body_char_start.min(self.chunk_overlap);
            let chunk = &text[overlap_start..body.end];

            chunks.push((body_char_start - overlap_chars, chunk.to_string()));
            body_char_start += char_len(&text[body]);
        }

        // 4. 앞뒤 공백 청크만 제거 (중간 공백 청크는 유지)
        let is_blank = |c: &(usize, String)| c.1.trim().is_empty();
        let first = chunks.iter().position(|c| !is_blank(c)).unwrap_or(chunks.len());
        let last = chunks.iter().rposition(|c| !is_blank(c)).map_or(first, |i| i + 1);

        chunks.drain(last..);
        chunks.drain(..first);
        chunks
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// `text[span]`을 구분자 우선순위에 따라 budget 이하 조각으로 분할
///
/// 구분자는 앞 조각 끝에 남기므로 조각들은 원문을 빈틈없이 덮습니다.
fn split_pieces(
    text: &str,
    span: Range<usize>,
    separators: &[&str],
    budget: usize,
    out: &mut Vec<Range<usize>>,
) {
    let piece = &text[span.clone()];
    if char_len(piece) <= budget {
        out.push(span);
        return;
    }

    let found = separators
        .iter()
        .position(|sep| !sep.is_empty() && piece.contains(sep));

    let Some(idx) = found else {
        hard_split(piece, span.start, budget, out);
        return;
    };

    let separator = separators[idx];
    let rest = &separators[idx + 1..];

    let mut start = span.start;
    for part in piece.split_inclusive(separator) {
        let end = start + part.len();
        split_pieces(text, start..end, rest, budget, out);
        start = end;
    }
}

/// 문자 단위로 budget 크기씩 자르기
fn hard_split(piece: &str, offset: usize, budget: usize, out: &mut Vec<Range<usize>>) {
    let mut start = 0;
    let mut count = 0;

    for (pos, _) in piece.char_indices() {
        if count == budget {
            out.push(offset + start..offset + pos);
            start = pos;
            count = 0;
        }
        count += 1;
    }

    if start < piece.len() {
        out.push(offset + start..offset + piece.len());
    }
}

/// 인접 조각을 budget 이내로 탐욕 병합
fn merge_pieces(text: &str, pieces: Vec<Range<usize>>, budget: usize) -> Vec<Range<usize>> {
    let mut bodies = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;

    for piece in pieces {
        let len = char_len(&text[piece.clone()]);

        if let Some((span, total)) = current.as_mut() {
            if *total + len <= budget {
                span.end = piece.end;
                *total += len;
                continue;
            }
        }

        if let Some((span, _)) = current.replace((piece, len)) {
            bodies.push(span);
        }
    }

    if let Some((span, _)) = current {
        bodies.push(span);
    }

    bodies
}

/// `index`(바이트)에서 n 문자 앞의 바이트 위치 (문자열 시작에서 멈춤)
fn back_chars(text: &str, index: usize, n: usize) -> usize {
    if n == 0 {
        return index;
    }
    text[..index]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(pos, _)| pos)
        .unwrap_or(0)
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정에 맞는 청커 생성
pub fn chunker_for(config: &ChunkConfig) -> Result<Box<dyn Chunker>> {
    let chunker = match config.method {
        SplitMethod::Recursive => {
            SeparatorChunker::recursive(config.chunk_size, config.chunk_overlap)?
        }
        SplitMethod::Fixed => SeparatorChunker::fixed(config.chunk_size, config.chunk_overlap)?,
    };
    Ok(Box::new(chunker))
}

/// 문서 텍스트 분할 (순수 함수)
pub fn split(text: &str, metadata: &Metadata, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    Ok(chunker_for(config)?.split(text, metadata))
}

// ============================================================================
// Tests
// ============================================================================
