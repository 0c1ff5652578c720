//! 会话记忆：固定层（PinnedContext）+ 可压缩对话层（ConversationMemory）
//!
//! 团队内所有 Agent 共享同一个 SessionMemory；压缩只动对话层。

use serde::{Deserialize, Serialize};

use crate::memory::{ConversationMemory, Message, PinnedContext};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionMemory {
    pub pinned: PinnedContext,
    pub conversation: ConversationMemory,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.conversation.push(msg);
    }

    /// 预算估算用的完整视图：固定层（作为一条 system）+ 摘要 + 对话
    pub fn budget_view(&self) -> Vec<Message> {
        let mut out = Vec::new();
        let pinned = self.pinned.to_prompt_section();
        if !pinned.is_empty() {
            out.push(Message::system(pinned));
        }
        out.extend(self.conversation.to_llm_messages());
        out
    }
}
