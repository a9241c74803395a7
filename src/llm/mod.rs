//! LLM 모듈 - 완성(Completion) 능력
//!
//! 프롬프트 메시지 목록을 받아 답변 문자열을 돌려주는 외부 능력입니다.
//! OpenAI 호환 `/chat/completions` 엔드포인트를 사용하며, 재시도하지 않습니다.
//!
//! - 401/403 응답 → `RagError::Credential`
//! - 그 외 네트워크/프로바이더 실패 → 호출자가 `RagError::Completion`으로 분류

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::ApiError;
use crate::error::RagError;

// ============================================================================
// Message Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// 기록 시각 (요청 본문에는 포함되지 않음)
    #[serde(default = "Utc::now", skip_serializing)]
    pub at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// 완성 API 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// 모델 이름
    pub model: String,
    /// API 베이스 URL
    pub base_url: String,
    /// 샘플링 온도
    pub temperature: f32,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 기본 자격 증명을 찾을 환경변수 (우선순위 순)
    pub credential_env: Vec<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "glm-4-flash".to_string(),
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            temperature: 0.1,
            timeout_secs: 60,
            credential_env: vec!["RAGCHAT_API_KEY".to_string(), "ZHIPU_API_KEY".to_string()],
        }
    }
}

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 완성 능력 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 메시지 목록으로 답변 생성
    ///
    /// # Arguments
    /// * `messages` - 프롬프트 메시지
    /// * `config` - 모델, 엔드포인트, 온도, 타임아웃
    /// * `api_key` - 자격 증명 (엔진이 존재를 미리 확인함)
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
        api_key: &str,
    ) -> Result<String>;
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// OpenAI 호환 완성 클라이언트
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `/chat/completions` 엔드포인트 URL
fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
        api_key: &str,
    ) -> Result<String> {
        let url = completions_url(&config.base_url);
        let request = CompletionRequest {
            model: &config.model,
            messages,
            temperature: config.temperature,
        };

        tracing::debug!(
            "Requesting completion: model={}, messages={}",
            config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send completion request to {}", url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let detail = || {
            serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body.clone())
        };

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(RagError::Credential(format!(
                "provider rejected the credential ({}): {}",
                status,
                detail()
            ))
            .into());
        }

        if !status.is_success() {
            anyhow::bail!("Completion API error ({}): {}", status, detail());
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).context("Failed to parse completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Completion response contained no message"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_without_timestamp() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_message_deserializes_without_timestamp() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hello"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"answer"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let config = CompletionConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = OpenAiCompatibleClient::new();
        let err = client
            .complete(&[ChatMessage::user("hi")], &config, "key")
            .await
            .unwrap_err();

        // 네트워크 실패는 Credential로 분류되지 않음
        assert!(!matches!(
            RagError::from_completion(err),
            RagError::Credential(_)
        ));
    }
}
