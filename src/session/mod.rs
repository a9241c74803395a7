//! Session Store - 세션별 대화 기록
//!
//! 세션은 처음 사용할 때 생성됩니다. 세션 수와 세션당 메시지 수에 상한이 있으며,
//! 세션 수가 넘치면 가장 오래 사용하지 않은 세션을 제거합니다.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::llm::ChatMessage;

/// 세션 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 최대 세션 수
    pub max_sessions: usize,
    /// 세션당 최대 메시지 수 (오래된 것부터 버림)
    pub max_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            max_messages: 40,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    messages: Vec<ChatMessage>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Sessions {
    map: HashMap<String, Session>,
    tick: u64,
}

/// 세션 저장소
#[derive(Debug)]
pub struct SessionStore {
    config: SessionConfig,
    inner: Mutex<Sessions>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Sessions::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Sessions>> {
        self.inner
            .lock()
            .map_err(|e| RagError::Store(anyhow::anyhow!("Lock error: {}", e)))
    }

    /// 세션 기록 (없으면 빈 세션 생성)
    pub fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let mut sessions = self.lock()?;
        let session = touch(&mut sessions, session_id, self.config.max_sessions);
        Ok(session.messages.clone())
    }

    /// 메시지 추가
    pub fn append(&self, session_id: &str, messages: impl IntoIterator<Item = ChatMessage>) -> Result<()> {
        let mut sessions = self.lock()?;
        let max_messages = self.config.max_messages;
        let session = touch(&mut sessions, session_id, self.config.max_sessions);

        session.messages.extend(messages);
        if session.messages.len() > max_messages {
            let excess = session.messages.len() - max_messages;
            session.messages.drain(..excess);
        }
        Ok(())
    }

    /// 세션 삭제
    pub fn remove(&self, session_id: &str) -> Result<bool> {
        Ok(self.lock()?.map.remove(session_id).is_some())
    }

    /// 세션 수
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.map.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// 세션 조회/생성 + 최근 사용 갱신 (상한 초과 시 LRU 제거)
fn touch<'a>(sessions: &'a mut Sessions, session_id: &str, max_sessions: usize) -> &'a mut Session {
    sessions.tick += 1;
    let tick = sessions.tick;

    if !sessions.map.contains_key(session_id) {
        while sessions.map.len() >= max_sessions.max(1) {
            let oldest = sessions
                .map
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    tracing::debug!("Evicting session {}", id);
                    sessions.map.remove(&id);
                }
                None => break,
            }
        }
    }

    let session = sessions.map.entry(session_id.to_string()).or_default();
    session.last_used = tick;
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_sessions: usize, max_messages: usize) -> SessionStore {
        SessionStore::new(SessionConfig {
            max_sessions,
            max_messages,
        })
    }

    #[test]
    fn test_create_on_first_use() {
        let sessions = store(4, 10);
        assert!(sessions.history("a").unwrap().is_empty());
        assert_eq!(sessions.len().unwrap(), 1);
    }

    #[test]
    fn test_append_and_trim() {
        let sessions = store(4, 3);
        sessions
            .append(
                "a",
                (0..5).map(|i| ChatMessage::user(format!("m{}", i))),
            )
            .unwrap();

        let history = sessions.history("a").unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_lru_eviction() {
        let sessions = store(2, 10);
        sessions.append("a", [ChatMessage::user("1")]).unwrap();
        sessions.append("b", [ChatMessage::user("2")]).unwrap();
        // a를 다시 사용 → b가 가장 오래됨
        sessions.history("a").unwrap();
        sessions.append("c", [ChatMessage::user("3")]).unwrap();

        assert_eq!(sessions.len().unwrap(), 2);
        assert_eq!(sessions.history("a").unwrap().len(), 1);
        assert_eq!(sessions.history("c").unwrap().len(), 1);
    }

    #[test]
    fn test_remove() {
        let sessions = store(2, 10);
        sessions.history("a").unwrap();
        assert!(sessions.remove("a").unwrap());
        assert!(!sessions.remove("a").unwrap());
        assert!(sessions.is_empty().unwrap());
    }
}
