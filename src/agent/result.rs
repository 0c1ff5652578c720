//! 单轮执行结果：AgentResult（四选一终态）与 DelegationRequest

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;

/// 执行器向调度器报告结果的唯一通道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentResult {
    Completed {
        deliverable: Value,
        /// 对应 OutputSchema 的名字
        deliverable_type: String,
    },
    NeedsClarification {
        message: String,
        #[serde(default)]
        questions: Vec<String>,
        #[serde(default)]
        options: Vec<String>,
    },
    Failed {
        error: String,
    },
    SystemError {
        error: String,
    },
}

impl AgentResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, AgentResult::Completed { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            AgentResult::Completed { .. } => "completed",
            AgentResult::NeedsClarification { .. } => "needs_clarification",
            AgentResult::Failed { .. } => "failed",
            AgentResult::SystemError { .. } => "system_error",
        }
    }

    pub fn deliverable(&self) -> Option<&Value> {
        match self {
            AgentResult::Completed { deliverable, .. } => Some(deliverable),
            _ => None,
        }
    }

    /// 用于事件与日志的一行摘要
    pub fn summary(&self) -> String {
        match self {
            AgentResult::Completed { deliverable, .. } => match deliverable {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            AgentResult::NeedsClarification { message, .. } => message.clone(),
            AgentResult::Failed { error } | AgentResult::SystemError { error } => error.clone(),
        }
    }
}

/// 控制权移交请求：由工具循环中的 delegate_to_* 调用产生
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub from_agent: String,
    pub target: String,
    pub task: String,
    /// 本轮内产生的对话（交给接手方作为上下文）
    pub handover: Vec<Message>,
}

/// 执行器返回值
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Result(AgentResult),
    Delegation(DelegationRequest),
}

impl AgentOutcome {
    pub fn result(&self) -> Option<&AgentResult> {
        match self {
            AgentOutcome::Result(r) => Some(r),
            AgentOutcome::Delegation(_) => None,
        }
    }

    pub fn into_result(self) -> Option<AgentResult> {
        match self {
            AgentOutcome::Result(r) => Some(r),
            AgentOutcome::Delegation(_) => None,
        }
    }
}

impl From<AgentResult> for AgentOutcome {
    fn from(result: AgentResult) -> Self {
        AgentOutcome::Result(result)
    }
}
