//! 团队类型：拓扑、Agent 状态、运行状态与运行结果

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::AgentResult;
use crate::memory::{CompactionReport, SessionMemory};

/// 团队拓扑（决定下一跳）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// 按声明顺序逐个执行
    Sequential,
    /// 通过委派工具自由移交控制权
    Dynamic,
    /// 经理（首个成员）分派，worker 结果回到经理
    Hierarchical,
    /// 按依赖并发
    Parallel,
    /// 前 n-1 个并发 map，最后一个 reduce
    MapReduce,
}

/// 团队内单个 Agent 的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// 前置依赖失败，未执行
    Skipped,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Skipped
        )
    }

    pub fn from_result(result: &AgentResult) -> Self {
        if result.is_completed() {
            AgentStatus::Completed
        } else {
            AgentStatus::Failed
        }
    }
}

/// 调度器持有的共享运行状态（可整体存取 checkpoint）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub session_id: String,
    pub session: SessionMemory,
    pub active_agent: Option<String>,
    pub statuses: BTreeMap<String, AgentStatus>,
    /// 每个 Agent 最近一次的结果
    pub results: BTreeMap<String, AgentResult>,
    pub delegations: usize,
    /// 依次执行过的 Agent
    pub trace: Vec<String>,
}

impl RunState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn status(&self, agent_id: &str) -> AgentStatus {
        self.statuses
            .get(agent_id)
            .copied()
            .unwrap_or(AgentStatus::Pending)
    }

    pub fn set_status(&mut self, agent_id: &str, status: AgentStatus) {
        self.statuses.insert(agent_id.to_string(), status);
    }

    /// 记录一次 Agent 结果（状态随之更新）
    pub fn record(&mut self, agent_id: &str, result: AgentResult) {
        self.set_status(agent_id, AgentStatus::from_result(&result));
        if result.is_completed() {
            self.session
                .pinned
                .add_artifact(format!("deliverable:{}", agent_id));
        }
        self.results.insert(agent_id.to_string(), result);
        self.trace.push(agent_id.to_string());
    }

    pub fn result(&self, agent_id: &str) -> Option<&AgentResult> {
        self.results.get(agent_id)
    }
}

/// 团队运行的终态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TeamOutcome {
    /// 最后一个 Agent 正常交付
    Completed { agent_id: String, result: AgentResult },
    /// 某个 Agent 未完成（failed / system_error / needs_clarification），该分支停止
    Halted { agent_id: String, result: AgentResult },
    /// 用户输入是手动压缩指令，只做了压缩
    Compacted { report: CompactionReport },
}

impl TeamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TeamOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TeamRun {
    pub outcome: TeamOutcome,
    pub state: RunState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_status_and_pins_artifact() {
        let mut state = RunState::new("s1");
        assert_eq!(state.status("a"), AgentStatus::Pending);
        state.record(
            "a",
            AgentResult::Completed {
                deliverable: serde_json::json!("x"),
                deliverable_type: "text".into(),
            },
        );
        state.record("b", AgentResult::Failed { error: "bad".into() });
        assert_eq!(state.status("a"), AgentStatus::Completed);
        assert_eq!(state.status("b"), AgentStatus::Failed);
        assert_eq!(state.trace, vec!["a", "b"]);
        assert_eq!(state.session.pinned.artifacts, vec!["deliverable:a".to_string()]);
    }

    #[test]
    fn test_run_state_round_trips_through_json() {
        let mut state = RunState::new("s1");
        state.active_agent = Some("a".into());
        state.set_status("a", AgentStatus::Running);
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status("a"), AgentStatus::Running);
        assert_eq!(back.active_agent.as_deref(), Some("a"));
    }
}
