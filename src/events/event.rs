//! 生命周期事件：Agent 轮次、委派、工具调用、压缩、规划与反思

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::{CompactionReason, CompactionScope};

/// 事件类型（可序列化为 JSON 供前端 / 遥测使用；type 字段即订阅用的事件名）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum HiveEvent {
    #[serde(rename = "agent.started")]
    AgentStarted { agent_id: String, query: String },
    #[serde(rename = "agent.completed")]
    AgentCompleted {
        agent_id: String,
        duration_ms: u64,
        /// 截断后的结果摘要
        summary: String,
    },
    #[serde(rename = "agent.failed")]
    AgentFailed {
        agent_id: String,
        duration_ms: u64,
        error: String,
    },
    #[serde(rename = "delegation.started")]
    DelegationStarted {
        from_agent: String,
        to_agent: String,
        task: String,
    },
    #[serde(rename = "delegation.completed")]
    DelegationCompleted {
        from_agent: String,
        to_agent: String,
        /// 被委派方是否以 completed 结束
        success: bool,
    },
    #[serde(rename = "tool.called")]
    ToolCalled {
        agent_id: String,
        tool: String,
        args: serde_json::Value,
    },
    #[serde(rename = "tool.completed")]
    ToolCompleted {
        agent_id: String,
        tool: String,
        duration_ms: u64,
        preview: String,
    },
    #[serde(rename = "tool.failed")]
    ToolFailed {
        agent_id: String,
        tool: String,
        error: String,
    },
    #[serde(rename = "compaction.triggered")]
    CompactionTriggered {
        reason: CompactionReason,
        scope: CompactionScope,
        mandatory: bool,
        tokens_before: usize,
        tokens_after: usize,
    },
    #[serde(rename = "plan.created")]
    PlanCreated {
        goal: String,
        task_count: usize,
        retry_count: u32,
    },
    #[serde(rename = "reflection.completed")]
    ReflectionCompleted {
        next_action: String,
        goal_achieved: bool,
        confidence: f32,
    },
}

impl HiveEvent {
    /// 订阅用的事件名（与序列化后的 type 字段一致）
    pub fn event_type(&self) -> &'static str {
        match self {
            HiveEvent::AgentStarted { .. } => "agent.started",
            HiveEvent::AgentCompleted { .. } => "agent.completed",
            HiveEvent::AgentFailed { .. } => "agent.failed",
            HiveEvent::DelegationStarted { .. } => "delegation.started",
            HiveEvent::DelegationCompleted { .. } => "delegation.completed",
            HiveEvent::ToolCalled { .. } => "tool.called",
            HiveEvent::ToolCompleted { .. } => "tool.completed",
            HiveEvent::ToolFailed { .. } => "tool.failed",
            HiveEvent::CompactionTriggered { .. } => "compaction.triggered",
            HiveEvent::PlanCreated { .. } => "plan.created",
            HiveEvent::ReflectionCompleted { .. } => "reflection.completed",
        }
    }
}

/// 带时间戳的事件
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HiveEvent,
}

impl EventEnvelope {
    pub fn new(event: HiveEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_matches_event_type() {
        let ev = HiveEvent::AgentCompleted {
            agent_id: "analyst".into(),
            duration_ms: 12,
            summary: "ok".into(),
        };
        let json = serde_json::to_value(EventEnvelope::new(ev.clone())).unwrap();
        assert_eq!(json["type"], ev.event_type());
        assert_eq!(json["agent_id"], "analyst");
        assert!(json.get("timestamp").is_some());
    }
}
