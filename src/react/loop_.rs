//! ReAct 主循环
//!
//! planning -> executing -> reflecting -> {executing | planning | done}
//!
//! 每执行完一个任务就反思一次；system_error 先快速重试（不经过 Reflector），
//! 重规划总次数受 MAX_REPLAN_DEPTH 约束。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::agent::{describe_result, AgentExecutor, AgentOutcome, AgentResult, TurnContext};
use crate::config::ReactSection;
use crate::core::PlanError;
use crate::events::HiveEvent;
use crate::llm::LlmClient;
use crate::memory::SessionMemory;
use crate::react::{
    decide_next_action, LoopStep, NextAction, Plan, PlanStatus, Planner, Reflection, Reflector,
};

/// 重规划次数硬上限
pub const MAX_REPLAN_DEPTH: u32 = 5;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_SYSTEM_FAST_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactOutcome {
    pub success: bool,
    pub plan: Plan,
    pub reflection: Option<Reflection>,
    pub replans: u32,
    pub error: Option<String>,
}

pub struct ReactLoop {
    executor: Arc<AgentExecutor>,
    planner: Planner,
    reflector: Reflector,
    max_retries: u32,
    max_replan_depth: u32,
    system_fast_retries: u32,
}

impl ReactLoop {
    /// llm 用于规划与反思；任务本身由各 Agent 的模型执行
    pub fn new(executor: Arc<AgentExecutor>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            planner: Planner::new(Arc::clone(&llm), Arc::clone(executor.registry())),
            reflector: Reflector::new(llm),
            executor,
            max_retries: DEFAULT_MAX_RETRIES,
            max_replan_depth: MAX_REPLAN_DEPTH,
            system_fast_retries: DEFAULT_SYSTEM_FAST_RETRIES,
        }
    }

    pub fn with_config(mut self, section: &ReactSection) -> Self {
        self.max_retries = section.max_retries;
        self.max_replan_depth = section.max_replan_depth.min(MAX_REPLAN_DEPTH);
        self.system_fast_retries = section.system_fast_retries;
        self
    }

    pub async fn run(
        &self,
        goal: &str,
        session: &mut SessionMemory,
        cancel: CancellationToken,
    ) -> Result<ReactOutcome, PlanError> {
        let mut plan = self.planner.create_plan(goal, self.max_retries).await?;
        plan.status = PlanStatus::Running;
        self.emit_plan(&plan).await;

        let mut replans = 0u32;
        let mut fast_retries = 0u32;
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut last_reflection: Option<Reflection> = None;
        let mut latest: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(finish(plan, false, last_reflection, replans, Some("cancelled".into())));
            }

            // executing
            let next = if plan.has_failed_task() {
                None
            } else {
                plan.next_ready().map(|t| t.id.clone())
            };
            match next {
                Some(task_id) => {
                    let (agent_id, result) = self.execute_task(&mut plan, &task_id, session, &cancel).await;
                    let Some(task) = plan.task_mut(&task_id) else {
                        continue;
                    };
                    match &result {
                        r if r.is_completed() => {
                            task.mark_completed(r.summary());
                            fast_retries = 0;
                        }
                        AgentResult::SystemError { error }
                            if fast_retries < self.system_fast_retries && !cancel.is_cancelled() =>
                        {
                            fast_retries += 1;
                            tracing::warn!(
                                task = %task_id,
                                attempt = fast_retries,
                                max = self.system_fast_retries,
                                error = %error,
                                "system error, fast retry"
                            );
                            task.reset();
                            continue;
                        }
                        other => {
                            task.mark_failed(other.summary());
                            fast_retries = 0;
                        }
                    }
                    latest = Some(describe_result(&agent_id, &result));
                }
                None if plan.is_all_done() => {
                    tracing::info!(tasks = plan.tasks.len(), "all tasks completed");
                    return Ok(finish(plan, true, last_reflection, replans, None));
                }
                None => tracing::info!("no ready task, reflecting"),
            }

            // reflecting
            let reflection = match self.reflector.reflect(&plan, latest.as_deref()).await {
                Ok(reflection) => reflection,
                Err(err) => Reflection::unknown(format!("reflector call failed: {}", err)),
            };
            self.executor
                .events()
                .emit(HiveEvent::ReflectionCompleted {
                    next_action: reflection.next_action.as_str().to_string(),
                    goal_achieved: reflection.goal_achieved,
                    confidence: reflection.confidence,
                })
                .await;

            match decide_next_action(&plan, &reflection) {
                LoopStep::Success => {
                    return Ok(finish(plan, true, Some(reflection), replans, None));
                }
                LoopStep::Failure => {
                    let error = failure_reason(&reflection);
                    return Ok(finish(plan, false, Some(reflection), replans, Some(error)));
                }
                LoopStep::Planner => {
                    replans += 1;
                    if replans > self.max_replan_depth {
                        tracing::error!(max = self.max_replan_depth, "replan depth exceeded");
                        let error = format!("replan depth {} exceeded", self.max_replan_depth);
                        return Ok(finish(plan, false, Some(reflection), replans, Some(error)));
                    }
                    tracing::info!(replans, max = self.max_replan_depth, "replanning");
                    plan = self.planner.replan(&plan, &reflection.summary).await?;
                    plan.status = PlanStatus::Running;
                    self.emit_plan(&plan).await;
                    attempts.clear();
                    fast_retries = 0;
                    latest = None;
                }
                LoopStep::Executor if reflection.next_action == NextAction::Retry => {
                    let max_retries = plan.max_retries;
                    if let Some(task) = plan.current_task_mut() {
                        let n = attempts.entry(task.id.clone()).or_insert(0);
                        *n += 1;
                        if *n > max_retries {
                            let error = format!("task {} retried {} times", task.id, max_retries);
                            return Ok(finish(plan, false, Some(reflection), replans, Some(error)));
                        }
                        tracing::info!(task = %task.id, attempt = *n, "retrying task");
                        task.reset();
                    }
                }
                LoopStep::Executor => {
                    // continue 只在还有可执行任务时有意义
                    if plan.has_failed_task() || (plan.next_ready().is_none() && !plan.is_all_done()) {
                        let error = "plan is blocked".to_string();
                        return Ok(finish(plan, false, Some(reflection), replans, Some(error)));
                    }
                }
            }
            last_reflection = Some(reflection);
        }
    }

    async fn execute_task(
        &self,
        plan: &mut Plan,
        task_id: &str,
        session: &mut SessionMemory,
        cancel: &CancellationToken,
    ) -> (String, AgentResult) {
        let query = task_query(plan, task_id);
        let Some(task) = plan.task_mut(task_id) else {
            return (
                String::new(),
                AgentResult::Failed {
                    error: format!("task {} not found", task_id),
                },
            );
        };
        task.mark_running();
        let agent_id = task.assigned_agent.clone();
        plan.current_task_id = Some(task_id.to_string());
        tracing::info!(task = %task_id, agent_id = %agent_id, "executing task");

        let turn = TurnContext::new(cancel.clone());
        let result = match self.executor.execute(&agent_id, &query, session, &turn).await {
            AgentOutcome::Result(result) => result,
            AgentOutcome::Delegation(request) => AgentResult::Failed {
                error: format!("unexpected delegation to '{}'", request.target),
            },
        };
        (agent_id, result)
    }

    async fn emit_plan(&self, plan: &Plan) {
        self.executor
            .events()
            .emit(HiveEvent::PlanCreated {
                goal: plan.goal.clone(),
                task_count: plan.tasks.len(),
                retry_count: plan.retry_count,
            })
            .await;
    }
}

/// 任务描述 + 目标 + 依赖任务的结果
fn task_query(plan: &Plan, task_id: &str) -> String {
    let Some(task) = plan.task(task_id) else {
        return plan.goal.clone();
    };
    let mut query = format!(
        "Goal: {}\n\nYour task ({}): {}",
        plan.goal, task.id, task.description
    );
    let upstream: Vec<String> = task
        .depends_on
        .iter()
        .filter_map(|dep| plan.task(dep))
        .filter_map(|dep| dep.result.as_ref().map(|r| format!("[{}] {}", dep.id, r)))
        .collect();
    if !upstream.is_empty() {
        query.push_str("\n\nResults of prerequisite tasks:\n");
        query.push_str(&upstream.join("\n"));
    }
    query
}

fn failure_reason(reflection: &Reflection) -> String {
    match reflection.next_action {
        NextAction::Fail => format!("goal not achievable: {}", reflection.reason),
        NextAction::Replan => "replan limit reached".to_string(),
        _ => format!("unrecognized reflector decision: {}", reflection.reason),
    }
}

fn finish(
    mut plan: Plan,
    success: bool,
    reflection: Option<Reflection>,
    replans: u32,
    error: Option<String>,
) -> ReactOutcome {
    plan.status = if success {
        PlanStatus::Completed
    } else {
        PlanStatus::Failed
    };
    tracing::info!(success, replans, "react loop finished");
    ReactOutcome {
        success,
        plan,
        reflection,
        replans,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRegistry, AgentSpec, OutputSchema};
    use crate::llm::{LlmError, ModelResponse, ScriptedLlmClient};
    use crate::react::TaskStatus;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use std::time::Duration;

    const TWO_TASKS: &str = r#"{"understanding": "report", "tasks": [
        {"description": "collect data", "assigned_agent": "analyst"},
        {"description": "write report", "assigned_agent": "writer", "depends_on": ["1"]}
    ]}"#;

    const ONE_TASK: &str =
        r#"{"tasks": [{"description": "collect data", "assigned_agent": "analyst"}]}"#;

    fn reflect(action: &str) -> String {
        format!(
            r#"{{"goal_achieved": {}, "confidence": 0.9, "summary": "s", "next_action": "{}", "reason": "r"}}"#,
            action == "complete",
            action
        )
    }

    fn react(
        brain: Vec<String>,
        analyst: Arc<ScriptedLlmClient>,
        writer: Arc<ScriptedLlmClient>,
    ) -> (ReactLoop, Arc<ScriptedLlmClient>) {
        let mut registry = AgentRegistry::new();
        for id in ["analyst", "writer"] {
            registry
                .register(
                    AgentSpec::builder(id, id)
                        .output_schema(OutputSchema::text("text"))
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        let brain = Arc::new(ScriptedLlmClient::texts(brain));
        let executor = AgentExecutor::new(
            Arc::new(registry),
            brain.clone(),
            ToolExecutor::new(ToolRegistry::new(), Duration::from_secs(5)),
        )
        .with_agent_llm("analyst", analyst)
        .with_agent_llm("writer", writer);
        (ReactLoop::new(Arc::new(executor), brain.clone()), brain)
    }

    fn texts(items: &[&str]) -> Arc<ScriptedLlmClient> {
        Arc::new(ScriptedLlmClient::texts(items.iter().copied()))
    }

    #[tokio::test]
    async fn test_plan_execute_reflect_to_completion() {
        let writer = texts(&["final report"]);
        let (react, brain) = react(
            vec![TWO_TASKS.into(), reflect("continue"), reflect("complete")],
            texts(&["numbers"]),
            writer.clone(),
        );
        let mut session = SessionMemory::new();
        let outcome = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.plan.status, PlanStatus::Completed);
        assert!(outcome
            .plan
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed));
        assert_eq!(brain.invocation_count(), 3);
        let writer_calls = writer.calls();
        let query = &writer_calls[0].messages.last().unwrap().content;
        assert!(query.contains("[t1] numbers"));
    }

    #[tokio::test]
    async fn test_retry_resets_current_task() {
        let analyst = texts(&["", "numbers"]);
        let (react, _) = react(
            vec![ONE_TASK.into(), reflect("retry"), reflect("complete")],
            analyst.clone(),
            texts(&[]),
        );
        let mut session = SessionMemory::new();
        let outcome = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(analyst.invocation_count(), 2);
        assert_eq!(outcome.plan.tasks[0].result.as_deref(), Some("numbers"));
    }

    #[tokio::test]
    async fn test_replan_increments_retry_count() {
        let writer_plan = r#"{"tasks": [{"description": "write anyway", "assigned_agent": "writer"}]}"#;
        let (react, _) = react(
            vec![
                ONE_TASK.into(),
                reflect("replan"),
                writer_plan.into(),
                reflect("complete"),
            ],
            texts(&[""]),
            texts(&["done"]),
        );
        let mut session = SessionMemory::new();
        let outcome = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.replans, 1);
        assert_eq!(outcome.plan.retry_count, 1);
        assert_eq!(outcome.plan.tasks[0].assigned_agent, "writer");
    }

    #[tokio::test]
    async fn test_replan_beyond_max_retries_fails() {
        let (react, _) = react(
            vec![ONE_TASK.into(), reflect("replan"), ONE_TASK.into(), reflect("replan")],
            texts(&["", ""]),
            texts(&[]),
        );
        let react = react.with_config(&ReactSection {
            max_retries: 1,
            max_replan_depth: 5,
            system_fast_retries: 3,
        });
        let mut session = SessionMemory::new();
        let outcome = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.replans, 1);
        assert_eq!(outcome.error.as_deref(), Some("replan limit reached"));
    }

    #[tokio::test]
    async fn test_unknown_reflection_fails() {
        let (react, _) = react(
            vec![TWO_TASKS.into(), "let me think about it".into()],
            texts(&["numbers"]),
            texts(&[]),
        );
        let mut session = SessionMemory::new();
        let outcome = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.plan.status, PlanStatus::Failed);
        assert_eq!(
            outcome.reflection.map(|r| r.next_action),
            Some(NextAction::Unknown)
        );
    }

    #[tokio::test]
    async fn test_system_error_fast_retry_skips_reflection() {
        let analyst = Arc::new(ScriptedLlmClient::new([
            Err(LlmError::Transport("reset".into())),
            Ok(ModelResponse::text("numbers")),
        ]));
        let (react, brain) = react(
            vec![ONE_TASK.into(), reflect("complete")],
            analyst.clone(),
            texts(&[]),
        );
        let mut session = SessionMemory::new();
        let outcome = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(analyst.invocation_count(), 2);
        // 一次规划 + 一次反思
        assert_eq!(brain.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_plan_is_error() {
        let (react, _) = react(vec!["no plan".into()], texts(&[]), texts(&[]));
        let mut session = SessionMemory::new();
        let err = react
            .run("report", &mut session, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidJson(_)));
    }
}
