//! Mock LLM 客户端（用于测试与演示，无需 API）
//!
//! - MockLlmClient：把最后一条 User 消息包成 `{"answer": ...}` 返回
//! - ScriptedLlmClient：按脚本依次返回预设回复，并记录每次调用收到的消息与选项

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{InvokeOptions, LlmClient, LlmError, ModelResponse};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug)]
pub struct MockLlmClient {
    provider: String,
}

impl MockLlmClient {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn invoke(
        &self,
        messages: &[Message],
        _options: &InvokeOptions,
    ) -> Result<ModelResponse, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let body = serde_json::json!({ "answer": format!("Echo from Mock: {}", last_user) });
        Ok(ModelResponse::text(body.to_string()))
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: InvokeOptions,
}

/// 脚本客户端：每次 invoke 弹出一条预设结果；脚本耗尽后返回 InvalidResponse
pub struct ScriptedLlmClient {
    provider: String,
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    invocations: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = Result<ModelResponse, LlmError>>) -> Self {
        Self {
            provider: "mock".to_string(),
            script: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
            invocations: AtomicUsize::new(0),
        }
    }

    /// 只含文本回复的脚本
    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(ModelResponse::text(t))))
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// 每次调用前等待（模拟网络延迟，配合取消测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<ModelResponse, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn invoke(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ModelResponse, LlmError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                messages: messages.to_vec(),
                options: options.clone(),
            });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())))
    }
}
