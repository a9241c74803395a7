//! 설정 모듈
//!
//! 적용 순서: 기본값 → `config.json` → 환경변수 → CLI 플래그
//!
//! | 환경변수 | 대상 |
//! |---|---|
//! | `RAGCHAT_DATA_DIR` | `data_dir` |
//! | `RAGCHAT_MODEL` | `completion.model` |
//! | `RAGCHAT_BASE_URL` | `completion.base_url` |
//! | `RAGCHAT_RETRIEVAL_MODE` | `retrieval.mode` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::answer::AnswerConfig;
use crate::embedding::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::knowledge::{ChunkConfig, RetrievalConfig};
use crate::llm::CompletionConfig;
use crate::session::SessionConfig;

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.json";

/// 벡터 인덱스 디렉토리 이름
pub const VECTORS_DIR_NAME: &str = "vectors.lance";

const ENV_DATA_DIR: &str = "RAGCHAT_DATA_DIR";
const ENV_MODEL: &str = "RAGCHAT_MODEL";
const ENV_BASE_URL: &str = "RAGCHAT_BASE_URL";
const ENV_RETRIEVAL_MODE: &str = "RAGCHAT_RETRIEVAL_MODE";

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 데이터 디렉토리
    pub data_dir: PathBuf,
    pub chunk: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub completion: CompletionConfig,
    pub embedding: EmbeddingConfig,
    pub answer: AnswerConfig,
    pub session: SessionConfig,
    /// clear()에서 저장소 핸들 해제 후 대기 시간 (ms)
    pub clear_settle_ms: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            answer: AnswerConfig::default(),
            session: SessionConfig::default(),
            clear_settle_ms: 500,
        }
    }
}

impl RagConfig {
    /// 설정 로드
    ///
    /// # Arguments
    /// * `config_path` - 명시적 설정 파일 (없으면 `<data_dir>/config.json`이 있을 때만 사용)
    /// * `data_dir` - CLI에서 지정한 데이터 디렉토리 (가장 우선)
    pub fn load(config_path: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let base_dir = data_dir
            .map(Path::to_path_buf)
            .or_else(|| env_value(ENV_DATA_DIR).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let file = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let candidate = base_dir.join(CONFIG_FILE_NAME);
                candidate.exists().then_some(candidate)
            }
        };

        let mut config = match file {
            Some(path) => {
                tracing::debug!("Loading config from {:?}", path);
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_overrides(env_value);

        if let Some(dir) = data_dir {
            config.data_dir = dir.to_path_buf();
        }

        Ok(config)
    }

    /// JSON 파일에서 읽기 (빠진 필드는 기본값)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            RagError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// 환경변수 덮어쓰기 (`lookup`은 변수 이름 → 값)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.completion.model = model;
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.completion.base_url = base_url;
        }
        if let Some(mode) = lookup(ENV_RETRIEVAL_MODE) {
            match mode.parse() {
                Ok(mode) => self.retrieval.mode = mode,
                Err(e) => tracing::warn!("Ignoring {}: {}", ENV_RETRIEVAL_MODE, e),
            }
        }
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;

        if self.retrieval.k == 0 {
            return Err(RagError::InvalidConfig("retrieval.k must be at least 1".to_string()));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::InvalidConfig(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(RagError::InvalidConfig(format!(
                "completion.temperature must be within 0.0..=2.0 (got {})",
                self.completion.temperature
            )));
        }
        if self.session.max_sessions == 0 || self.session.max_messages == 0 {
            return Err(RagError::InvalidConfig(
                "session limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// 벡터 인덱스 경로
    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join(VECTORS_DIR_NAME)
    }

    /// clear() 대기 시간
    pub fn clear_settle_delay(&self) -> Duration {
        Duration::from_millis(self.clear_settle_ms)
    }
}

/// 기본 데이터 디렉토리
///
/// `<data_local_dir>/.ragchat`, 없으면 홈, 그것도 없으면 현재 디렉토리
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragchat")
}

/// 유효 자격 증명
///
/// 명시적 인자(비어 있지 않음)가 우선이고, 없으면 `env_keys` 순서대로
/// 비어 있지 않은 첫 환경변수 값을 사용합니다.
pub fn resolve_credential(explicit: Option<&str>, env_keys: &[String]) -> Option<String> {
    resolve_credential_with(explicit, env_keys, env_value)
}

fn resolve_credential_with(
    explicit: Option<&str>,
    env_keys: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| env_keys.iter().find_map(|key| lookup(key)))
}

/// 비어 있지 않은 환경변수 값
fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
