//! Reflector：检查计划执行情况，给出下一步
//!
//! 反思结果是循环唯一的状态转移依据；无法解析的输出一律视为 Unknown，按失败结束。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::extract_json;
use crate::llm::{InvokeOptions, LlmClient, LlmError};
use crate::memory::Message;
use crate::react::{Plan, TaskStatus};

const REFLECTOR_SYSTEM_PROMPT: &str = "You are a reflection agent that evaluates execution results and decides the next action.\n\
Base decisions on observed results. Focus on the user goal, not on completing every task.\n\
Next action options:\n\
- continue: the current task succeeded and tasks remain\n\
- retry: the current task failed but the failure looks transient\n\
- replan: the plan needs adjustment\n\
- complete: the goal is achieved\n\
- fail: the goal cannot be achieved\n\
Output JSON only:\n\
{\"goal_achieved\": false, \"confidence\": 0.8, \"summary\": \"...\", \"issues\": [], \"suggestions\": [], \"next_action\": \"continue\", \"reason\": \"...\"}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    Retry,
    Replan,
    Complete,
    Fail,
    /// 无法识别的取值
    Unknown,
}

impl NextAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "continue" => NextAction::Continue,
            "retry" => NextAction::Retry,
            "replan" => NextAction::Replan,
            "complete" => NextAction::Complete,
            "fail" => NextAction::Fail,
            _ => NextAction::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Continue => "continue",
            NextAction::Retry => "retry",
            NextAction::Replan => "replan",
            NextAction::Complete => "complete",
            NextAction::Fail => "fail",
            NextAction::Unknown => "unknown",
        }
    }
}

/// 反思结果（不可变快照）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reflection {
    pub goal_achieved: bool,
    pub confidence: f32,
    pub summary: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub next_action: NextAction,
    pub reason: String,
}

impl Reflection {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            goal_achieved: false,
            confidence: 0.0,
            summary: String::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            next_action: NextAction::Unknown,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReflectorOutput {
    #[serde(default)]
    goal_achieved: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    next_action: String,
    #[serde(default)]
    reason: String,
}

/// 解析模型输出；任何解析问题都得到 next_action = Unknown
pub fn parse_reflection(raw: &str) -> Reflection {
    let Some(json) = extract_json(raw) else {
        return Reflection::unknown(format!("reflector output has no JSON: {}", raw.trim()));
    };
    match serde_json::from_str::<ReflectorOutput>(json) {
        Ok(out) => Reflection {
            goal_achieved: out.goal_achieved,
            confidence: out.confidence.clamp(0.0, 1.0),
            summary: out.summary,
            issues: out.issues,
            suggestions: out.suggestions,
            next_action: NextAction::parse(&out.next_action),
            reason: out.reason,
        },
        Err(e) => Reflection::unknown(format!("invalid reflector output: {}", e)),
    }
}

/// 循环的下一个状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    Planner,
    Executor,
    Success,
    Failure,
}

/// 决策表：每个 next_action 恰好对应一个 LoopStep
pub fn decide_next_action(plan: &Plan, reflection: &Reflection) -> LoopStep {
    match reflection.next_action {
        NextAction::Complete => LoopStep::Success,
        NextAction::Fail => LoopStep::Failure,
        NextAction::Replan if plan.can_retry() => LoopStep::Planner,
        NextAction::Replan => {
            tracing::info!(retry_count = plan.retry_count, "replan limit reached");
            LoopStep::Failure
        }
        NextAction::Retry | NextAction::Continue => LoopStep::Executor,
        NextAction::Unknown => {
            tracing::warn!(reason = %reflection.reason, "unknown reflector decision");
            LoopStep::Failure
        }
    }
}

pub struct Reflector {
    llm: Arc<dyn LlmClient>,
}

impl Reflector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn reflect(&self, plan: &Plan, latest: Option<&str>) -> Result<Reflection, LlmError> {
        let mut context = format!(
            "{}\n\nRetried: {} / max {}\nProgress: completed {}/{}, failed {}, pending {}",
            plan.to_prompt(),
            plan.retry_count,
            plan.max_retries,
            plan.count(TaskStatus::Completed),
            plan.tasks.len(),
            plan.count(TaskStatus::Failed),
            plan.count(TaskStatus::Pending),
        );
        if let Some(latest) = latest {
            context.push_str(&format!("\n\nLatest result:\n{}", latest));
        }
        let messages = vec![Message::system(REFLECTOR_SYSTEM_PROMPT), Message::user(context)];
        let response = self.llm.invoke(&messages, &InvokeOptions::default()).await?;
        let reflection = parse_reflection(response.text_content().unwrap_or_default());
        tracing::info!(
            goal_achieved = reflection.goal_achieved,
            next_action = reflection.next_action.as_str(),
            "reflection completed"
        );
        Ok(reflection)
    }
}
