//! 计划：目标 + 有依赖的任务列表
//!
//! 任务由 Planner 追加，只有循环在轮次结束时改写任务状态。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    /// t1, t2, ...
    pub id: String,
    pub description: String,
    pub assigned_agent: String,
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl PlanTask {
    pub fn is_ready(&self, completed: &HashSet<&str>) -> bool {
        self.status == TaskStatus::Pending
            && self.depends_on.iter().all(|d| completed.contains(d.as_str()))
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub fn mark_completed(&mut self, result: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result.into());
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
    }

    /// 重试前回到 pending
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.error = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub tasks: Vec<PlanTask>,
    pub status: PlanStatus,
    pub current_task_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Plan {
    pub fn new(goal: impl Into<String>, max_retries: u32) -> Self {
        Self {
            goal: goal.into(),
            tasks: Vec::new(),
            status: PlanStatus::Pending,
            current_task_id: None,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn add_task(
        &mut self,
        description: impl Into<String>,
        assigned_agent: impl Into<String>,
        depends_on: Vec<String>,
    ) -> &PlanTask {
        let id = format!("t{}", self.tasks.len() + 1);
        self.tasks.push(PlanTask {
            id,
            description: description.into(),
            assigned_agent: assigned_agent.into(),
            depends_on,
            status: TaskStatus::Pending,
            result: None,
            error: None,
        });
        &self.tasks[self.tasks.len() - 1]
    }

    pub fn task(&self, id: &str) -> Option<&PlanTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut PlanTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn current_task(&self) -> Option<&PlanTask> {
        self.current_task_id.as_deref().and_then(|id| self.task(id))
    }

    pub fn current_task_mut(&mut self) -> Option<&mut PlanTask> {
        let id = self.current_task_id.clone()?;
        self.task_mut(&id)
    }

    pub fn completed_ids(&self) -> HashSet<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect()
    }

    /// 第一个就绪任务（声明顺序）
    pub fn next_ready(&self) -> Option<&PlanTask> {
        let completed = self.completed_ids();
        self.tasks.iter().find(|t| t.is_ready(&completed))
    }

    pub fn is_all_done(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
    }

    pub fn has_failed_task(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// 给 Planner / Reflector 看的任务清单
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![format!("Goal: {}", self.goal), String::new(), "Tasks:".to_string()];
        for task in &self.tasks {
            let status = serde_json::to_value(task.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let deps = if task.depends_on.is_empty() {
                String::new()
            } else {
                format!(" (depends on: {})", task.depends_on.join(", "))
            };
            lines.push(format!(
                "- [{}] [{}] {} -> {}{}",
                status, task.id, task.description, task.assigned_agent, deps
            ));
            if let Some(result) = &task.result {
                lines.push(format!("  result: {}", result));
            }
            if let Some(error) = &task.error {
                lines.push(format!("  error: {}", error));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        let mut plan = Plan::new("ship report", 3);
        plan.add_task("collect", "analyst", vec![]);
        plan.add_task("draft", "writer", vec!["t1".into()]);
        plan.add_task("format", "writer", vec![]);
        plan
    }

    #[test]
    fn test_ready_follows_dependencies() {
        let mut plan = plan();
        assert_eq!(plan.next_ready().map(|t| t.id.as_str()), Some("t1"));

        plan.task_mut("t1").unwrap().mark_running();
        // t2 依赖 t1，只能先跑 t3
        assert_eq!(plan.next_ready().map(|t| t.id.as_str()), Some("t3"));

        plan.task_mut("t1").unwrap().mark_completed("data");
        assert_eq!(plan.next_ready().map(|t| t.id.as_str()), Some("t2"));
    }

    #[test]
    fn test_done_and_failed() {
        let mut plan = plan();
        assert!(!plan.is_all_done());
        plan.task_mut("t1").unwrap().mark_failed("boom");
        assert!(plan.has_failed_task());
        plan.task_mut("t1").unwrap().reset();
        assert!(!plan.has_failed_task());
        for id in ["t1", "t2", "t3"] {
            plan.task_mut(id).unwrap().mark_completed("ok");
        }
        assert!(plan.is_all_done());
        assert!(plan.to_prompt().contains("[completed] [t2] draft -> writer (depends on: t1)"));
    }
}
