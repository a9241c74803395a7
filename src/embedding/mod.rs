//! 임베딩 모듈 - 텍스트 벡터화 능력
//!
//! 인덱스 저장소가 청크와 질의를 벡터로 바꿀 때 사용하는 프로바이더입니다.
//!
//! - [`OpenAiEmbedding`]: OpenAI 호환 `/embeddings` 엔드포인트
//! - [`LocalEmbedding`]: 네트워크 없이 동작하는 결정적 feature hashing 임베딩
//!
//! 재시도는 하지 않습니다. 실패는 그대로 호출자에게 전달됩니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&EmbeddingConfig::default())?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::resolve_credential;
use crate::knowledge::tokenize;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다. 같은 모델이면 결과는 결정적이어야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Configuration
// ============================================================================

/// 임베딩 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// 로컬 feature hashing (오프라인)
    #[default]
    Local,
    /// OpenAI 호환 HTTP API
    OpenAi,
}

/// 임베딩 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// 모델 이름 (OpenAI 호환 백엔드)
    pub model: String,
    /// API 베이스 URL (OpenAI 호환 백엔드)
    pub base_url: String,
    /// 벡터 차원 (영속 인덱스 스키마에 고정됨)
    pub dimension: usize,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// API 키를 찾을 환경변수 (우선순위 순)
    pub api_key_env: Vec<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: "embedding-3".to_string(),
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            dimension: DEFAULT_DIMENSION,
            timeout_secs: 30,
            api_key_env: vec![
                "RAGCHAT_EMBEDDING_API_KEY".to_string(),
                "RAGCHAT_API_KEY".to_string(),
            ],
        }
    }
}

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 384;

// ============================================================================
// OpenAI-compatible Embedding
// ============================================================================

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: Option<String>,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    /// 설정으로 생성
    ///
    /// # Arguments
    /// * `config` - 임베딩 설정
    /// * `api_key` - Bearer 토큰 (없으면 인증 헤더 생략)
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        if config.dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send embedding request to {}", self.endpoint))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                anyhow::bail!("Embedding API error ({}): {}", status, error.error.message);
            }
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let mut parsed: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        if parsed.data.len() != input.len() {
            anyhow::bail!(
                "Embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                input.len()
            );
        }

        parsed.data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch: configured {}, model returned {}",
                self.dimension,
                bad.len()
            );
        }

        Ok(vectors)
    }
}

/// `/embeddings` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// `/embeddings` 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI 호환 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub(crate) error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub(crate) message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding API returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!("Embedding batch of {} texts via {}", texts.len(), self.model);
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Local Embedding
// ============================================================================

/// 로컬 feature hashing 임베딩
///
/// 각 텀을 SHA-256으로 해시해 차원 인덱스와 부호를 정하고, 로그 TF를 더한 뒤
/// L2 정규화합니다. 의미 유사도는 텀 겹침 수준으로만 근사됩니다.
#[derive(Debug, Clone)]
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }
        Ok(Self { dimension })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for term in tokenize::terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (term, count) in counts {
            let digest = Sha256::digest(term.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(bytes);

            let index = (hash % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign * (1.0 + (count as f32).ln());
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "local-hash"
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Local => Arc::new(LocalEmbedding::new(config.dimension)?),
        EmbeddingBackend::OpenAi => {
            let api_key = resolve_credential(None, &config.api_key_env);
            if api_key.is_none() {
                tracing::warn!(
                    "No embedding API key found in {:?}; requests will be unauthenticated",
                    config.api_key_env
                );
            }
            Arc::new(OpenAiEmbedding::new(config, api_key)?)
        }
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_local_embedding_deterministic_and_normalized() {
        let embedder = LocalEmbedding::new(64).unwrap();
        let a = embedder.embed("Rust ownership and borrowing").await.unwrap();
        let b = embedder.embed("Rust ownership and borrowing").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_local_embedding_term_overlap_is_closer() {
        let embedder = LocalEmbedding::new(DEFAULT_DIMENSION).unwrap();
        let query = embedder.embed("vector database search").await.unwrap();
        let related = embedder.embed("search a vector database quickly").await.unwrap();
        let unrelated = embedder.embed("banana bread recipe").await.unwrap();

        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_local_embedding_empty_text_is_zero() {
        let embedder = LocalEmbedding::new(16).unwrap();
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_invalid_dimension() {
        assert!(LocalEmbedding::new(0).is_err());
        let config = EmbeddingConfig {
            dimension: 0,
            ..Default::default()
        };
        assert!(OpenAiEmbedding::new(&config, None).is_err());
    }

    #[test]
    fn test_create_embedder_default_is_local() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.name(), "local-hash");
        assert_eq!(embedder.dimension(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_openai_embedding_unreachable_fails() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::OpenAi,
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let embedder = OpenAiEmbedding::new(&config, None).unwrap();
        assert!(embedder.embed("hello").await.is_err());
    }
}
