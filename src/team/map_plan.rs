//! MapReduce 切分：map 阶段开始前，把任务拆成每个 mapper 各自的子片段
//!
//! 模型输出 `{"understanding": "...", "tasks": [{"agent_id", "description", "input"}]}`。
//! agent_id 必须是本队 mapper；同一 mapper 的多个片段按出现顺序合并；
//! 没有分到片段的 mapper 处理完整任务。

use std::sync::Arc;

use serde::Deserialize;

use crate::agent::{extract_json, AgentRegistry};
use crate::core::PlanError;
use crate::llm::{InvokeOptions, LlmClient};
use crate::memory::Message;

const MAP_PLANNER_SYSTEM_PROMPT: &str = "You split a task into independent slices that workers process in parallel.\n\
Give every worker the part of the task it should handle, using the worker id from the list. \
Slices must not overlap; a final step will merge the results.\n\
Output JSON only:\n\
{\"understanding\": \"...\", \"tasks\": [{\"agent_id\": \"...\", \"description\": \"...\", \"input\": \"...\"}]}";

#[derive(Debug, Deserialize)]
struct MapPlannerOutput {
    #[serde(default)]
    understanding: String,
    #[serde(default)]
    tasks: Vec<MapTaskOutput>,
}

#[derive(Debug, Deserialize)]
struct MapTaskOutput {
    agent_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input: String,
}

/// 分给单个 mapper 的一段工作
#[derive(Debug, Clone, PartialEq)]
pub struct MapSlice {
    pub agent_id: String,
    pub description: String,
    pub input: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapPlan {
    pub understanding: String,
    pub slices: Vec<MapSlice>,
}

impl MapPlan {
    /// mapper 的查询：整体任务 + 分到的片段
    pub fn query_for(&self, agent_id: &str, task: &str) -> String {
        let parts: Vec<String> = self
            .slices
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .map(|s| match (s.description.trim(), s.input.trim()) {
                ("", input) => format!("Input:\n{}", input),
                (description, "") => description.to_string(),
                (description, input) => format!("{}\n\nInput:\n{}", description, input),
            })
            .collect();
        if parts.is_empty() {
            return task.to_string();
        }
        format!(
            "Overall task: {}\n\nYour slice:\n{}",
            task,
            parts.join("\n\n")
        )
    }

    /// 没有分到任何片段的 mapper
    pub fn unassigned(&self, mappers: &[String]) -> Vec<String> {
        mappers
            .iter()
            .filter(|id| !self.slices.iter().any(|s| &s.agent_id == *id))
            .cloned()
            .collect()
    }
}

/// 解析并校验切分结果
pub fn parse_map_plan(raw: &str, mappers: &[String]) -> Result<MapPlan, PlanError> {
    let json = extract_json(raw).ok_or_else(|| PlanError::InvalidJson(raw.trim().to_string()))?;
    let output: MapPlannerOutput =
        serde_json::from_str(json).map_err(|e| PlanError::InvalidJson(e.to_string()))?;
    if output.tasks.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    let mut slices = Vec::with_capacity(output.tasks.len());
    for (idx, task) in output.tasks.into_iter().enumerate() {
        let agent_id = task.agent_id.trim().to_string();
        if !mappers.contains(&agent_id) {
            return Err(PlanError::UnknownAgent {
                task: format!("slice {}", idx + 1),
                agent: agent_id,
            });
        }
        slices.push(MapSlice {
            agent_id,
            description: task.description,
            input: task.input,
        });
    }
    Ok(MapPlan {
        understanding: output.understanding,
        slices,
    })
}

pub struct MapPlanner {
    llm: Arc<dyn LlmClient>,
}

impl MapPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn split(
        &self,
        task: &str,
        mappers: &[String],
        agents: &AgentRegistry,
    ) -> Result<MapPlan, PlanError> {
        let workers: Vec<String> = mappers
            .iter()
            .map(|id| match agents.get(id) {
                Some(spec) if !spec.description.is_empty() => {
                    format!("- {}: {}", id, spec.description)
                }
                _ => format!("- {}", id),
            })
            .collect();
        let messages = vec![
            Message::system(format!(
                "{}\n\nWorkers:\n{}",
                MAP_PLANNER_SYSTEM_PROMPT,
                workers.join("\n")
            )),
            Message::user(format!("Task: {}", task)),
        ];
        let response = self.llm.invoke(&messages, &InvokeOptions::default()).await?;
        let plan = parse_map_plan(response.text_content().unwrap_or_default(), mappers)?;
        tracing::info!(
            slices = plan.slices.len(),
            mappers = mappers.len(),
            "map phase split"
        );
        Ok(plan)
    }
}
