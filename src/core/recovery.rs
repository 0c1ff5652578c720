//! 失败归类
//!
//! 将 AgentError 映射为 FailureKind，并折叠为 AgentResult：业务问题 -> failed，内部故障 -> system_error。
//! 执行器本身不重试，是否重试由调度器 / ReAct 循环决定。

use crate::agent::AgentResult;
use crate::core::{AgentError, FailureKind};

/// 语义化失败归类
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, err: &AgentError) -> FailureKind {
        match err {
            AgentError::EmptyResponse { .. }
            | AgentError::SchemaMismatch { .. }
            | AgentError::StepsExhausted { .. }
            | AgentError::HallucinatedTool(_)
            | AgentError::ToolExecutionFailed(_) => FailureKind::Business,
            AgentError::Llm { .. }
            | AgentError::ToolTimeout(_)
            | AgentError::UnknownAgent(_)
            | AgentError::Cancelled => FailureKind::System,
        }
    }

    /// 错误 -> 终态结果
    pub fn to_result(&self, err: &AgentError) -> AgentResult {
        match self.classify(err) {
            FailureKind::Business => AgentResult::Failed {
                error: err.to_string(),
            },
            FailureKind::System => AgentResult::SystemError {
                error: err.to_string(),
            },
        }
    }
}
