//! LLM 客户端抽象
//!
//! 所有后端（真实传输 / Mock / 包装层）实现 LlmClient：invoke 接收消息与可选的工具集，返回文本或工具调用。
//! 重试、熔断、限流都以包装器的形式叠加，核心只依赖这个 trait。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;

/// 模型请求的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

/// 绑定给模型的工具描述（name / description / JSON Schema 参数）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单次调用的选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOptions {
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
}

/// 模型回复：content 可能为空（纯工具调用或异常返回）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall::new(name, args)],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 去除空白后的文本；空字符串视为 None
    pub fn text_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("circuit open for provider '{provider}'")]
    CircuitOpen { provider: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 是否值得重试（瞬时故障）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::Timeout | LlmError::RateLimited(_)
        )
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// provider 名（限流与熔断按此分桶）
    fn provider(&self) -> &str;

    async fn invoke(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ModelResponse, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 绑定了工具集（与温度）的客户端句柄
#[derive(Clone)]
pub struct BoundLlm {
    llm: Arc<dyn LlmClient>,
    options: InvokeOptions,
}

impl BoundLlm {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.options.tools
    }

    pub fn provider(&self) -> &str {
        self.llm.provider()
    }

    pub async fn invoke(&self, messages: &[Message]) -> Result<ModelResponse, LlmError> {
        self.llm.invoke(messages, &self.options).await
    }
}

/// `bind_tools`：为 `Arc<dyn LlmClient>` 生成带工具的句柄
pub trait LlmClientExt {
    fn bind_tools(&self, tools: Vec<ToolSpec>) -> BoundLlm;
}

impl LlmClientExt for Arc<dyn LlmClient> {
    fn bind_tools(&self, tools: Vec<ToolSpec>) -> BoundLlm {
        BoundLlm {
            llm: Arc::clone(self),
            options: InvokeOptions {
                tools,
                temperature: None,
            },
        }
    }
}
