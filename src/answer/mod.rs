//! Answer Engine - 이중 모드 답변 정책
//!
//! 질의마다 지식베이스에 청크가 하나라도 있는지 확인해 모드를 고릅니다.
//!
//! - 없음 → `normal_chat`: 질문(및 세션 기록)만으로 대화
//! - 있음 → `rag`: 검색된 컨텍스트로만 답하고, 컨텍스트에 정보가 없으면 고정 거절 문구
//!
//! 프롬프트 조립은 순수 함수 [`build_prompt`]로 분리되어 있습니다.
//! [`AnswerEngine::prepare`]는 모델 호출 직전까지(모드 결정, 검색, 프롬프트)를 수행하고
//! [`AnswerEngine::finish`]가 모델을 호출합니다. 관리자는 전자만 읽기 잠금 안에서 실행합니다.

use serde::{Deserialize, Serialize};

use crate::config::resolve_credential;
use crate::error::{RagError, Result};
use crate::knowledge::{Chunk, IndexStore, LexicalMirror, RetrievalMode, Retriever, DEFAULT_K};
use crate::llm::{ChatMessage, CompletionConfig, CompletionProvider};

/// 컨텍스트에 관련 정보가 없을 때의 고정 거절 문구
pub const REFUSAL_PHRASE: &str =
    "Sorry, the knowledge base does not contain relevant content, so this question cannot be answered.";

/// 검색 결과가 없을 때 컨텍스트 자리에 들어가는 표시
pub const NO_CONTEXT_PLACEHOLDER: &str = "(no relevant content)";

/// 컨텍스트 청크 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const CONVERSATIONAL_SYSTEM_PROMPT: &str = "You are a friendly AI assistant. \
Answer the user's question in the language the question is written in.";

// ============================================================================
// Types
// ============================================================================

/// 답변 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// 지식베이스 없음 - 일반 대화
    NormalChat,
    /// 컨텍스트 기반 답변
    Rag,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::NormalChat => "normal_chat",
            AnswerMode::Rag => "rag",
        }
    }
}

/// 답변 결과
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    /// 근거 청크 (normal_chat 모드에서는 항상 비어 있음)
    pub source_documents: Vec<Chunk>,
    pub mode: AnswerMode,
}

/// 답변 정책 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerConfig {
    /// 검색 결과가 0개면 모델 호출 없이 거절 문구 반환
    ///
    /// 기본값은 false: 모델이 "(no relevant content)" 표시가 담긴 프롬프트를 받습니다.
    pub refuse_without_context: bool,
}

/// 채팅 요청
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    /// 명시적 자격 증명 (없으면 `completion.credential_env`에서 찾음)
    pub credential: Option<String>,
    pub completion: CompletionConfig,
    pub mode: RetrievalMode,
    pub k: usize,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            credential: None,
            completion: CompletionConfig::default(),
            mode: RetrievalMode::default(),
            k: DEFAULT_K,
        }
    }

    /// 요청 값 검증 (k >= 1)
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(RagError::InvalidConfig(
                "k must be at least 1 (got 0)".to_string(),
            ));
        }
        Ok(())
    }
}

/// 모델 호출 직전까지 준비된 답변 (자격 증명 포함)
pub struct AnswerPlan {
    api_key: String,
    messages: Vec<ChatMessage>,
    source_documents: Vec<Chunk>,
    mode: AnswerMode,
    refuse: bool,
}

/// 프롬프트 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode<'a> {
    /// 질문(및 기록)만
    Conversational,
    /// 컨텍스트 블록 기반
    Grounded { context: &'a str },
}

// ============================================================================
// Prompt Assembly
// ============================================================================

/// 검색된 청크를 하나의 컨텍스트 블록으로
///
/// 비어 있으면 빈 문자열 대신 명시적 표시를 넣습니다.
pub fn format_context(chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_PLACEHOLDER.to_string();
    }

    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn grounded_system_prompt() -> String {
    format!(
        "You are a question-answering assistant backed by a knowledge base. Follow these rules strictly:\n\
         1. Answer only from the content inside <context>.\n\
         2. If the context does not contain the relevant information, reply exactly: \"{}\"\n\
         3. Do not invent or speculate about anything that is not in the context.\n\
         4. Answer in the language the question is written in.",
        REFUSAL_PHRASE
    )
}

/// 프롬프트 메시지 목록 조립 (순수 함수)
///
/// `history`는 Conversational 모드에서만 사용됩니다.
pub fn build_prompt(mode: PromptMode<'_>, query: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    match mode {
        PromptMode::Conversational => {
            let mut messages = Vec::with_capacity(history.len() + 2);
            messages.push(ChatMessage::system(CONVERSATIONAL_SYSTEM_PROMPT));
            messages.extend(history.iter().cloned());
            messages.push(ChatMessage::user(query));
            messages
        }
        PromptMode::Grounded { context } => vec![
            ChatMessage::system(grounded_system_prompt()),
            ChatMessage::user(format!(
                "<context>\n{}\n</context>\n\nQuestion: {}\n\nAnswer according to the rules above:",
                context, query
            )),
        ],
    }
}

// ============================================================================
// AnswerEngine
// ============================================================================

/// 답변 엔진 (요청 간 상태 없음)
pub struct AnswerEngine<'a> {
    index: &'a IndexStore,
    lexical: &'a LexicalMirror,
    completion: &'a dyn CompletionProvider,
    config: &'a AnswerConfig,
}

impl<'a> AnswerEngine<'a> {
    pub fn new(
        index: &'a IndexStore,
        lexical: &'a LexicalMirror,
        completion: &'a dyn CompletionProvider,
        config: &'a AnswerConfig,
    ) -> Self {
        Self {
            index,
            lexical,
            completion,
            config,
        }
    }

    /// 질의 응답 (준비 + 모델 호출)
    pub async fn answer(&self, request: &ChatRequest, history: &[ChatMessage]) -> Result<AnswerResult> {
        let plan = self.prepare(request, history).await?;
        self.finish(plan, request).await
    }

    /// 모드 결정, 검색, 프롬프트 조립
    ///
    /// 자격 증명은 검색/임베딩 전에 확인합니다. 모델은 호출하지 않습니다.
    pub async fn prepare(&self, request: &ChatRequest, history: &[ChatMessage]) -> Result<AnswerPlan> {
        request.validate()?;

        let api_key = resolve_credential(
            request.credential.as_deref(),
            &request.completion.credential_env,
        )
        .ok_or_else(|| {
            RagError::Credential(format!(
                "no API key supplied and none of {:?} is set",
                request.completion.credential_env
            ))
        })?;

        // 미러는 재시작 시 비므로 영속 인덱스도 함께 확인
        let mirror_len = self.lexical.len()?;
        let has_documents = mirror_len > 0 || self.index.count().await? > 0;

        tracing::debug!(
            "Answer mode decision: mirror={}, has_documents={}",
            mirror_len,
            has_documents
        );

        if !has_documents {
            return Ok(AnswerPlan {
                api_key,
                messages: build_prompt(PromptMode::Conversational, &request.query, history),
                source_documents: vec![],
                mode: AnswerMode::NormalChat,
                refuse: false,
            });
        }

        let retriever = Retriever::new(self.index, self.lexical);
        let chunks = retriever
            .retrieve(&request.query, request.mode, request.k)
            .await?;

        let context = format_context(&chunks);
        let messages = build_prompt(PromptMode::Grounded { context: &context }, &request.query, &[]);

        Ok(AnswerPlan {
            api_key,
            messages,
            refuse: chunks.is_empty() && self.config.refuse_without_context,
            source_documents: chunks,
            mode: AnswerMode::Rag,
        })
    }

    /// 준비된 프롬프트로 모델 호출
    pub async fn finish(&self, plan: AnswerPlan, request: &ChatRequest) -> Result<AnswerResult> {
        let answer = if plan.refuse {
            tracing::debug!("No context retrieved; returning refusal without calling the model");
            REFUSAL_PHRASE.to_string()
        } else {
            self.complete(&plan.messages, request, &plan.api_key).await?
        };

        Ok(AnswerResult {
            answer,
            source_documents: plan.source_documents,
            mode: plan.mode,
        })
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        request: &ChatRequest,
        api_key: &str,
    ) -> Result<String> {
        self.completion
            .complete(messages, &request.completion, api_key)
            .await
            .map_err(RagError::from_completion)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::source_metadata;
    use crate::llm::Role;

    #[test]
    fn test_format_context_placeholder() {
        assert_eq!(format_context(&[]), NO_CONTEXT_PLACEHOLDER);
    }

    #[test]
    fn test_format_context_joins_with_separator() {
        let chunks = vec![
            Chunk::new("first", source_metadata("a.md")),
            Chunk::new("second", source_metadata("b.md")),
        ];
        assert_eq!(format_context(&chunks), "first\n\n---\n\nsecond");
    }

    #[test]
    fn test_conversational_prompt_includes_history() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let messages = build_prompt(PromptMode::Conversational, "how are you?", &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hi");
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[3].content, "how are you?");
    }

    #[test]
    fn test_grounded_prompt_is_context_only() {
        let messages = build_prompt(
            PromptMode::Grounded {
                context: NO_CONTEXT_PLACEHOLDER,
            },
            "what is x?",
            &[ChatMessage::user("ignored history")],
        );

        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains(REFUSAL_PHRASE));
        assert!(messages[1].content.contains(NO_CONTEXT_PLACEHOLDER));
        assert!(messages[1].content.contains("what is x?"));
        assert!(messages.iter().all(|m| m.content != "ignored history"));
    }

    #[test]
    fn test_build_prompt_is_pure() {
        let a = build_prompt(PromptMode::Grounded { context: "ctx" }, "q", &[]);
        let b = build_prompt(PromptMode::Grounded { context: "ctx" }, "q", &[]);
        let contents = |m: &[ChatMessage]| m.iter().map(|x| x.content.clone()).collect::<Vec<_>>();
        assert_eq!(contents(&a), contents(&b));
    }

    #[test]
    fn test_request_rejects_zero_k() {
        let mut request = ChatRequest::new("q");
        assert!(request.validate().is_ok());

        request.k = 0;
        assert!(matches!(request.validate(), Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_default_sends_placeholder_to_model() {
        assert!(!AnswerConfig::default().refuse_without_context);
    }

    #[test]
    fn test_answer_mode_serialization() {
        assert_eq!(
            serde_json::to_value(AnswerMode::NormalChat).unwrap(),
            serde_json::json!("normal_chat")
        );
        assert_eq!(AnswerMode::Rag.as_str(), "rag");
    }
}
