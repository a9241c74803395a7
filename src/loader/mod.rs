//! Document Loader - 파일 수집 및 텍스트 추출
//!
//! - `.txt`, `.md`: 파일 전체가 하나의 문서
//! - `.pdf`: 페이지마다 하나의 문서 (`page` 메타데이터)
//! - 그 외 확장자: `UnsupportedFormat`
//! - 읽을 수 없거나 손상된 파일: `Io`
//!
//! 폴더는 .gitignore 패턴을 존중하며 재귀 수집하고, 지원하는 확장자만 고릅니다.
//! 모든 문서의 `source`는 주어진 경로 문자열 그대로입니다.

mod pdf;

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde_json::Value;

use crate::error::{RagError, Result};
use crate::knowledge::{source_metadata, Metadata};

// ============================================================================
// Types
// ============================================================================

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// 텍스트 (txt, md)
    Text,
    /// PDF
    Pdf,
}

impl FileType {
    /// 확장자로 파일 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "md" => Some(FileType::Text),
            "pdf" => Some(FileType::Pdf),
            _ => None,
        }
    }

    /// 파일 경로에서 타입 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// 로드된 문서 (텍스트 + 메타데이터)
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub text: String,
    pub metadata: Metadata,
}

// ============================================================================
// Loading
// ============================================================================

/// 파일 하나 로드
pub async fn load_document(path: &Path) -> Result<Vec<LoadedDocument>> {
    let file_type = FileType::from_path(path)
        .ok_or_else(|| RagError::UnsupportedFormat(path.display().to_string()))?;

    let source = path.to_string_lossy().to_string();

    let documents = match file_type {
        FileType::Text => {
            let bytes = tokio::fs::read(path).await?;
            vec![LoadedDocument {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                metadata: source_metadata(&source),
            }]
        }
        FileType::Pdf => {
            let owned = path.to_path_buf();
            let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&owned))
                .await
                .map_err(|e| RagError::Store(anyhow::anyhow!("PDF task failed: {}", e)))??;

            pages
                .into_iter()
                .map(|(page, text)| {
                    let mut metadata = source_metadata(&source);
                    metadata.insert("page".to_string(), Value::from(page));
                    LoadedDocument { text, metadata }
                })
                .collect()
        }
    };

    tracing::debug!("Loaded {} document(s) from {:?}", documents.len(), path);
    Ok(documents)
}

/// 입력 경로를 파일 목록으로 펼치기
///
/// 파일은 그대로 (확장자 검사는 로드 시점), 폴더는 재귀 수집 후 정렬합니다.
pub fn collect_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            files.extend(collect_directory(path));
        } else {
            return Err(RagError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Path not found: {}", path.display()),
            )));
        }
    }

    Ok(files)
}

/// 폴더 재귀 수집 (지원 확장자만)
fn collect_directory(dir: &Path) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir).hidden(true).git_ignore(true).build();

    let mut files: Vec<PathBuf> = walker
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!("Failed to read entry: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.into_path())
        .filter(|p| FileType::from_path(p).is_some())
        .collect();

    files.sort();
    tracing::info!("Collected {} files from {:?}", files.len(), dir);
    files
}

// ============================================================================
// Tests
// ============================================================================
