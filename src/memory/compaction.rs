//! 上下文压缩：触发决策 + 执行
//!
//! 决策优先级：手动指令（/compact、/compress）> hard 阈值（必须压缩）> soft 阈值（建议压缩）> 不动作。
//! 执行只折叠可压缩对话层中较早的消息，PinnedContext 不参与。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::llm::{InvokeOptions, LlmClient, LlmError};
use crate::memory::token_budget::{compute_budget_usage, BudgetUsage, ContextBudget, TokenEstimator};
use crate::memory::{ConversationMemory, Message, Role};
use crate::observability::truncate_summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionScope {
    /// 需求对话（user / assistant 文本）
    Requirement,
    /// 工具证据（工具调用与返回）
    Artifacts,
    Both,
}

impl CompactionScope {
    fn covers(&self, msg: &Message) -> bool {
        if msg.role == Role::System {
            return false;
        }
        match self {
            CompactionScope::Requirement => !msg.is_tool_evidence(),
            CompactionScope::Artifacts => msg.is_tool_evidence(),
            CompactionScope::Both => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionReason {
    Manual,
    BudgetSoft,
    BudgetHard,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompactionDecision {
    pub scope: CompactionScope,
    pub reason: CompactionReason,
    /// false 表示仅建议（soft）
    pub mandatory: bool,
    pub usage: BudgetUsage,
}

/// 解析手动压缩指令；只识别显式前缀，其余输入一律返回 None
pub fn parse_compact_command(user_input: &str) -> Option<CompactionScope> {
    static COMMAND: OnceLock<Option<Regex>> = OnceLock::new();
    let re = COMMAND
        .get_or_init(|| Regex::new(r"^/(?:compress|compact)\b(?:\s+(\S+))?").ok())
        .as_ref()?;
    let lowered = user_input.trim().to_lowercase();
    let caps = re.captures(&lowered)?;
    let scope = match caps.get(1).map(|m| m.as_str()) {
        Some("req") | Some("requirement") | Some("todo") => CompactionScope::Requirement,
        Some("artifact") | Some("artifacts") | Some("evidence") => CompactionScope::Artifacts,
        _ => CompactionScope::Both,
    };
    Some(scope)
}

/// 每个轮次边界调用一次；usage 每次重新计算
pub fn decide_compaction(
    user_input: Option<&str>,
    messages: &[Message],
    budget: &ContextBudget,
) -> Option<CompactionDecision> {
    let usage = compute_budget_usage(messages, budget);
    if let Some(scope) = user_input.and_then(parse_compact_command) {
        return Some(CompactionDecision {
            scope,
            reason: CompactionReason::Manual,
            mandatory: true,
            usage,
        });
    }
    if usage.over_hard() {
        return Some(CompactionDecision {
            scope: CompactionScope::Both,
            reason: CompactionReason::BudgetHard,
            mandatory: true,
            usage,
        });
    }
    if usage.over_soft() {
        return Some(CompactionDecision {
            scope: CompactionScope::Both,
            reason: CompactionReason::BudgetSoft,
            mandatory: false,
            usage,
        });
    }
    None
}

/// 一次压缩的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionReport {
    pub compacted_messages: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

impl CompactionReport {
    pub fn is_noop(&self) -> bool {
        self.compacted_messages == 0
    }
}

const SUMMARY_LINE_CHARS: usize = 160;

const SUMMARY_PROMPT: &str = "Summarize the following conversation excerpt for future turns. \
Keep requirements, decisions, open questions and concrete results. Output plain text only.";

/// 压缩器：可选挂一个模型生成摘要，否则用确定性的逐条截断摘要
pub struct Compactor {
    llm: Option<Arc<dyn LlmClient>>,
    min_keep: usize,
}

impl Compactor {
    pub fn new(min_keep: usize) -> Self {
        Self { llm: None, min_keep }
    }

    pub fn min_keep(&self) -> usize {
        self.min_keep
    }

    /// 摘要模型（调用方应传入已限流的客户端）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn compact(
        &self,
        conversation: &mut ConversationMemory,
        scope: CompactionScope,
    ) -> Result<CompactionReport, LlmError> {
        let tokens_before = TokenEstimator::estimate_messages(&conversation.to_llm_messages());
        let messages = conversation.messages();

        // 保留区不能以 tool 消息开头，否则会和对应的调用请求分离
        let mut keep_from = messages.len().saturating_sub(self.min_keep);
        while keep_from > 0 && keep_from < messages.len() && messages[keep_from].role == Role::Tool {
            keep_from -= 1;
        }

        let (old, recent) = messages.split_at(keep_from);
        let (folded, untouched): (Vec<&Message>, Vec<&Message>) =
            old.iter().partition(|m| scope.covers(m));

        if folded.is_empty() {
            return Ok(CompactionReport {
                compacted_messages: 0,
                tokens_before,
                tokens_after: tokens_before,
            });
        }

        let fresh = self.summarize(&folded).await?;
        let summary = match conversation.summary() {
            Some(prev) => format!("{}\n{}", prev, fresh),
            None => fresh,
        };
        let retained: Vec<Message> = untouched
            .into_iter()
            .cloned()
            .chain(recent.iter().cloned())
            .collect();
        let compacted_messages = folded.len();
        conversation.replace(summary, retained);

        let tokens_after = TokenEstimator::estimate_messages(&conversation.to_llm_messages());
        tracing::info!(
            compacted_messages,
            tokens_before,
            tokens_after,
            scope = ?scope,
            "context compacted"
        );
        Ok(CompactionReport {
            compacted_messages,
            tokens_before,
            tokens_after,
        })
    }

    async fn summarize(&self, folded: &[&Message]) -> Result<String, LlmError> {
        if let Some(llm) = &self.llm {
            let transcript = render_transcript(folded, usize::MAX);
            let request = vec![Message::system(SUMMARY_PROMPT), Message::user(transcript)];
            let resp = llm.invoke(&request, &InvokeOptions::default()).await?;
            if let Some(text) = resp.text_content() {
                return Ok(text.to_string());
            }
            tracing::warn!("summary model returned empty content, using fallback summary");
        }
        Ok(render_transcript(folded, SUMMARY_LINE_CHARS))
    }
}

fn render_transcript(messages: &[&Message], max_chars: usize) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            let body = if m.content.trim().is_empty() && !m.tool_calls.is_empty() {
                let names: Vec<&str> = m.tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("called {}", names.join(", "))
            } else {
                m.content.trim().to_string()
            };
            format!("- {}: {}", role, truncate_summary(&body, max_chars))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
