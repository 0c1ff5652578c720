//! Planner：把目标拆成有依赖的任务，并分配给已注册的 Agent
//!
//! 模型输出 `{"understanding": "...", "tasks": [{"description", "assigned_agent", "depends_on": ["1"]}]}`，
//! depends_on 里的序号（从 1 开始）转换成任务 id `t{n}`。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::agent::{extract_json, AgentRegistry};
use crate::core::{PlanError, TeamError};
use crate::llm::{InvokeOptions, LlmClient};
use crate::memory::Message;
use crate::react::Plan;
use crate::team::DependencyGraph;

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning agent that breaks a user goal into executable tasks.\n\
Understand the goal, split it into tasks of reasonable size, assign each task to the best agent \
from the list (use the agent id), and declare dependencies explicitly by task number (starting at 1).\n\
Output JSON only:\n\
{\"understanding\": \"...\", \"tasks\": [{\"description\": \"...\", \"assigned_agent\": \"...\", \"depends_on\": []}]}";

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    understanding: String,
    #[serde(default)]
    tasks: Vec<PlanTaskOutput>,
}

#[derive(Debug, Deserialize)]
struct PlanTaskOutput {
    description: String,
    assigned_agent: String,
    #[serde(default)]
    depends_on: Vec<Value>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    agents: Arc<AgentRegistry>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, agents: Arc<AgentRegistry>) -> Self {
        Self { llm, agents }
    }

    fn system_prompt(&self) -> String {
        let agents: Vec<String> = self
            .agents
            .ids()
            .iter()
            .filter_map(|id| self.agents.get(id))
            .map(|spec| {
                let description = if spec.description.is_empty() {
                    "No description"
                } else {
                    spec.description.as_str()
                };
                format!("- {} ({}): {}", spec.id, spec.name, description)
            })
            .collect();
        format!("{}\n\nAvailable agents:\n{}", PLANNER_SYSTEM_PROMPT, agents.join("\n"))
    }

    pub async fn create_plan(&self, goal: &str, max_retries: u32) -> Result<Plan, PlanError> {
        tracing::info!(goal = %crate::observability::truncate_summary(goal, 100), "planning");
        let messages = vec![
            Message::system(self.system_prompt()),
            Message::user(format!("Goal: {}", goal)),
        ];
        let raw = self.ask(&messages).await?;
        let plan = parse_plan(goal, &raw, &self.agents, max_retries)?;
        tracing::info!(tasks = plan.tasks.len(), "plan created");
        Ok(plan)
    }

    /// 根据反思总结重新规划；新计划的 retry_count 加一
    pub async fn replan(&self, plan: &Plan, reflection_summary: &str) -> Result<Plan, PlanError> {
        let context = format!(
            "{}\n\nReflection summary:\n{}\n\nAdjust the plan: reorder, add or remove tasks, or reassign agents as needed.",
            plan.to_prompt(),
            reflection_summary
        );
        let messages = vec![Message::system(self.system_prompt()), Message::user(context)];
        let raw = self.ask(&messages).await?;
        let mut next = parse_plan(&plan.goal, &raw, &self.agents, plan.max_retries)?;
        next.retry_count = plan.retry_count + 1;
        tracing::info!(
            tasks = next.tasks.len(),
            retry_count = next.retry_count,
            "plan revised"
        );
        Ok(next)
    }

    async fn ask(&self, messages: &[Message]) -> Result<String, PlanError> {
        let response = self.llm.invoke(messages, &InvokeOptions::default()).await?;
        Ok(response.text_content().unwrap_or_default().to_string())
    }
}

/// 解析并校验模型给出的计划：Agent 必须已注册，依赖必须指向计划内的其他任务且无环
pub fn parse_plan(
    goal: &str,
    raw: &str,
    agents: &AgentRegistry,
    max_retries: u32,
) -> Result<Plan, PlanError> {
    let json = extract_json(raw).ok_or_else(|| PlanError::InvalidJson(raw.trim().to_string()))?;
    let output: PlannerOutput =
        serde_json::from_str(json).map_err(|e| PlanError::InvalidJson(e.to_string()))?;
    if output.tasks.is_empty() {
        return Err(PlanError::EmptyPlan);
    }
    tracing::debug!(understanding = %output.understanding, "planner output");

    let total = output.tasks.len();
    let mut plan = Plan::new(goal, max_retries);
    for (idx, task) in output.tasks.into_iter().enumerate() {
        let task_id = format!("t{}", idx + 1);
        if !agents.contains(&task.assigned_agent) {
            return Err(PlanError::UnknownAgent {
                task: task_id,
                agent: task.assigned_agent,
            });
        }
        let mut depends_on = Vec::new();
        for dep in &task.depends_on {
            match dependency_index(dep) {
                Some(n) if n >= 1 && n <= total && n != idx + 1 => {
                    let dep_id = format!("t{}", n);
                    if !depends_on.contains(&dep_id) {
                        depends_on.push(dep_id);
                    }
                }
                _ => {
                    return Err(PlanError::UnknownDependency {
                        task: task_id,
                        dependency: dependency_label(dep),
                    })
                }
            }
        }
        plan.add_task(task.description, task.assigned_agent, depends_on);
    }

    let nodes: Vec<(String, Vec<String>)> = plan
        .tasks
        .iter()
        .map(|t| (t.id.clone(), t.depends_on.clone()))
        .collect();
    DependencyGraph::new(&nodes).map_err(|e| match e {
        TeamError::DependencyCycle(ids) => PlanError::DependencyCycle(ids),
        other => PlanError::InvalidJson(other.to_string()),
    })?;
    Ok(plan)
}

/// 接受 1、"1"、"t1" 三种写法
fn dependency_index(dep: &Value) -> Option<usize> {
    match dep {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => {
            let s = s.trim();
            s.strip_prefix('t').unwrap_or(s).parse().ok()
        }
        _ => None,
    }
}

fn dependency_label(dep: &Value) -> String {
    match dep {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
