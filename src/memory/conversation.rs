//! 可压缩对话层
//!
//! 保存 user / assistant / tool 消息与一段滚动摘要；超预算时由 Compactor 把较早的消息折叠进摘要。

use serde::{Deserialize, Serialize};

use crate::llm::ToolCall;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 消息请求的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// tool 消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content.into())
        }
    }

    /// 工具证据：tool 消息或发起工具调用的 assistant 消息
    pub fn is_tool_evidence(&self) -> bool {
        self.role == Role::Tool || !self.tool_calls.is_empty()
    }
}

/// 对话记忆：消息列表 + 已压缩摘要
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    summary: Option<String>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// 以新摘要与保留消息替换当前内容（Compactor 使用）
    pub fn replace(&mut self, summary: String, retained: Vec<Message>) {
        self.summary = Some(summary);
        self.messages = retained;
    }

    /// 供 LLM 使用的消息：摘要（若有）作为一条 system 消息置于最前
    pub fn to_llm_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(summary) = &self.summary {
            out.push(Message::system(format!(
                "Previous conversation summary:\n\n{}",
                summary
            )));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.summary = None;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_comes_first() {
        let mut conv = ConversationMemory::new();
        conv.push(Message::user("hi"));
        conv.replace("earlier stuff".to_string(), vec![Message::assistant("ok")]);
        let msgs = conv.to_llm_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("earlier stuff"));
        assert_eq!(msgs[1].content, "ok");
    }

    #[test]
    fn test_tool_evidence() {
        assert!(Message::tool("call_1", "result").is_tool_evidence());
        assert!(!Message::user("hi").is_tool_evidence());
    }
}
