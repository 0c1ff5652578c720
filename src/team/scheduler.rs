//! 团队调度器
//!
//! 每一跳调用 AgentExecutor 执行当前 active Agent：
//! - 返回 Delegation -> 计数、发事件、控制权移交给目标
//! - 返回 Result -> 按拓扑决定下一跳；非 completed 一律停止该分支并上报
//!
//! 每一跳之后检查上下文预算（必要时压缩）并写 checkpoint。

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::agent::{describe_result, AgentExecutor, AgentOutcome, AgentResult, DelegationRequest, TurnContext};
use crate::config::AppConfig;
use crate::core::{Checkpointer, ConfigError, TeamError};
use crate::events::HiveEvent;
use crate::memory::{
    compute_budget_usage, decide_compaction, parse_compact_command, CompactionReport, Compactor,
    ContextBudget, Message, TokenEstimator,
};
use crate::team::{
    AgentStatus, DependencyGraph, MapPlan, MapPlanner, RunState, Team, TeamOutcome, TeamRun, Topology,
};

pub const DEFAULT_MAX_DELEGATIONS: usize = 16;

const DEFAULT_MIN_KEEP: usize = 4;

pub struct TeamScheduler {
    executor: Arc<AgentExecutor>,
    budget: ContextBudget,
    compactor: Compactor,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    max_delegations: usize,
}

impl TeamScheduler {
    pub fn new(executor: Arc<AgentExecutor>) -> Self {
        Self {
            executor,
            budget: ContextBudget::default(),
            compactor: Compactor::new(DEFAULT_MIN_KEEP),
            checkpointer: None,
            max_delegations: DEFAULT_MAX_DELEGATIONS,
        }
    }

    /// 预算、保留条数与委派上限取自配置；摘要使用执行器的默认模型
    pub fn from_config(executor: Arc<AgentExecutor>, config: &AppConfig) -> Result<Self, ConfigError> {
        let budget = ContextBudget::from_config(&config.context)?;
        let compactor =
            Compactor::new(config.context.compaction_min_keep).with_llm(executor.default_llm());
        Ok(Self {
            executor,
            budget,
            compactor,
            checkpointer: None,
            max_delegations: config.app.max_delegations,
        })
    }

    pub fn with_budget(mut self, budget: ContextBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_max_delegations(mut self, max_delegations: usize) -> Self {
        self.max_delegations = max_delegations;
        self
    }

    pub fn executor(&self) -> &Arc<AgentExecutor> {
        &self.executor
    }

    /// 新会话运行团队
    pub async fn run(
        &self,
        team: &Team,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<TeamRun, TeamError> {
        let state = RunState::new(uuid::Uuid::new_v4().to_string());
        self.run_with_state(team, task, state, cancel).await
    }

    /// 在已有状态（如从 checkpoint 恢复的会话）上运行团队
    pub async fn run_with_state(
        &self,
        team: &Team,
        task: &str,
        mut state: RunState,
        cancel: CancellationToken,
    ) -> Result<TeamRun, TeamError> {
        if parse_compact_command(task).is_some() {
            let report = match self.maybe_compact(&mut state, Some(task)).await {
                Some(report) => report,
                None => {
                    let tokens =
                        TokenEstimator::estimate_messages(&state.session.conversation.to_llm_messages());
                    CompactionReport {
                        compacted_messages: 0,
                        tokens_before: tokens,
                        tokens_after: tokens,
                    }
                }
            };
            self.checkpoint(&state).await?;
            return Ok(TeamRun {
                outcome: TeamOutcome::Compacted { report },
                state,
            });
        }

        for id in team.member_ids() {
            state.set_status(&id, AgentStatus::Pending);
            state.results.remove(&id);
        }
        state.delegations = 0;
        tracing::info!(
            team = %team.name,
            topology = ?team.topology,
            session_id = %state.session_id,
            "team run started"
        );

        let outcome = match team.topology {
            Topology::Sequential => self.run_sequential(team, task, &mut state, &cancel).await?,
            Topology::Dynamic => {
                let (agent_id, result) = self
                    .run_chain(team, team.entry(), task, &mut state, &cancel)
                    .await?;
                finish(agent_id, result)
            }
            Topology::Hierarchical => self.run_hierarchical(team, task, &mut state, &cancel).await?,
            Topology::Parallel => self.run_parallel(team, task, &mut state, &cancel).await?,
            Topology::MapReduce => self.run_map_reduce(team, task, &mut state, &cancel).await?,
        };

        state.active_agent = None;
        self.checkpoint(&state).await?;
        tracing::info!(
            team = %team.name,
            completed = outcome.is_completed(),
            turns = state.trace.len(),
            "team run finished"
        );
        Ok(TeamRun { outcome, state })
    }

    async fn run_sequential(
        &self,
        team: &Team,
        task: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<TeamOutcome, TeamError> {
        let mut query = task.to_string();
        let mut last: Option<(String, AgentResult)> = None;
        for agent_id in team.member_ids() {
            let result = settle(self.turn(team, &agent_id, &query, state, cancel).await?);
            if !result.is_completed() {
                return Ok(TeamOutcome::Halted { agent_id, result });
            }
            query = handoff_query(task, &agent_id, &result);
            last = Some((agent_id, result));
        }
        // 成员非空由 TeamBuilder 保证
        let (agent_id, result) = last.ok_or(TeamError::EmptyTeam)?;
        Ok(TeamOutcome::Completed { agent_id, result })
    }

    /// 沿委派链运行，直到某个 Agent 不再委派
    async fn run_chain(
        &self,
        team: &Team,
        entry: &str,
        task: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(String, AgentResult), TeamError> {
        let mut agent_id = entry.to_string();
        let mut query = task.to_string();
        let mut hops: Vec<DelegationRequest> = Vec::new();
        loop {
            match self.turn(team, &agent_id, &query, state, cancel).await? {
                AgentOutcome::Result(result) => {
                    for hop in hops.iter().rev() {
                        self.emit_delegation_completed(hop, result.is_completed()).await;
                    }
                    return Ok((agent_id, result));
                }
                AgentOutcome::Delegation(request) => {
                    self.begin_delegation(state, &request).await?;
                    agent_id = request.target.clone();
                    query = request.task.clone();
                    hops.push(request);
                }
            }
        }
    }

    /// 经理首先运行并在每个 worker 结果后再次运行；只有经理可以委派
    async fn run_hierarchical(
        &self,
        team: &Team,
        task: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<TeamOutcome, TeamError> {
        let manager = team.entry().to_string();
        let mut query = task.to_string();
        loop {
            let request = match self.turn(team, &manager, &query, state, cancel).await? {
                AgentOutcome::Result(result) => return Ok(finish(manager, result)),
                AgentOutcome::Delegation(request) => request,
            };
            self.begin_delegation(state, &request).await?;
            let worker = request.target.clone();
            let result = settle(self.turn(team, &worker, &request.task, state, cancel).await?);
            self.emit_delegation_completed(&request, result.is_completed())
                .await;
            if !result.is_completed() {
                return Ok(TeamOutcome::Halted {
                    agent_id: worker,
                    result,
                });
            }
            query = format!(
                "Original task: {}\n\nWorker report ({}):\n{}\n\nDecide the next step: delegate again or give the final answer.",
                task,
                describe_result(&worker, &result),
                result.summary()
            );
        }
    }

    async fn run_parallel(
        &self,
        team: &Team,
        task: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<TeamOutcome, TeamError> {
        let graph = match &team.graph {
            Some(graph) => graph.clone(),
            None => DependencyGraph::new(&no_dependencies(&team.member_ids()))?,
        };
        self.run_dag(&graph, state, cancel, |_| task.to_string()).await?;
        Ok(dag_outcome(&team.member_ids(), state))
    }

    async fn run_map_reduce(
        &self,
        team: &Team,
        task: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<TeamOutcome, TeamError> {
        let mut ids = team.member_ids();
        let reducer = ids.pop().ok_or(TeamError::MapReduceTooSmall(0))?;
        let mappers = ids;
        let graph = DependencyGraph::new(&no_dependencies(&mappers))?;

        // 取消时不再切分，run_dag 会把所有 mapper 标为跳过
        let planner = MapPlanner::new(self.executor.default_llm());
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => MapPlan::default(),
            plan = planner.split(task, &mappers, self.executor.registry()) => plan?,
        };
        for id in plan.unassigned(&mappers).iter().filter(|_| !cancel.is_cancelled()) {
            tracing::warn!(agent_id = %id, "mapper received no slice, using the whole task");
        }
        self.run_dag(&graph, state, cancel, |id| plan.query_for(id, task))
            .await?;

        if mappers
            .iter()
            .any(|id| state.status(id) != AgentStatus::Completed)
        {
            state.set_status(&reducer, AgentStatus::Skipped);
            tracing::warn!(reducer = %reducer, "map phase incomplete, reducer skipped");
            return Ok(dag_outcome(&mappers, state));
        }

        let outputs: Vec<String> = mappers
            .iter()
            .filter_map(|id| state.result(id).map(|r| format!("### {}\n{}", id, r.summary())))
            .collect();
        let query = format!(
            "Original task: {}\n\nMap outputs:\n{}\n\nCombine them into the final deliverable.",
            task,
            outputs.join("\n\n")
        );
        let result = settle(self.turn(team, &reducer, &query, state, cancel).await?);
        Ok(finish(reducer, result))
    }

    /// 按依赖图并发执行：就绪节点立即启动，分支在会话副本上运行，完成后把新消息并回共享会话
    async fn run_dag<F>(
        &self,
        graph: &DependencyGraph,
        state: &mut RunState,
        cancel: &CancellationToken,
        query_for: F,
    ) -> Result<(), TeamError>
    where
        F: Fn(&str) -> String,
    {
        let mut running = FuturesUnordered::new();
        loop {
            loop {
                let blocked = graph.blocked(&state.statuses);
                if blocked.is_empty() {
                    break;
                }
                for id in blocked {
                    tracing::warn!(agent_id = %id, "dependency failed, agent skipped");
                    state.set_status(&id, AgentStatus::Skipped);
                }
            }

            if !cancel.is_cancelled() {
                for id in graph.ready(&state.statuses) {
                    let query = self.with_upstream(graph, &id, &query_for(&id), state);
                    state.set_status(&id, AgentStatus::Running);
                    let executor = Arc::clone(&self.executor);
                    let mut session = state.session.clone();
                    let base = session.conversation.len();
                    let turn = TurnContext::new(cancel.clone());
                    running.push(async move {
                        let outcome = executor.execute(&id, &query, &mut session, &turn).await;
                        let produced = session
                            .conversation
                            .messages()
                            .get(base..)
                            .map(<[Message]>::to_vec)
                            .unwrap_or_default();
                        (id, outcome, produced)
                    });
                }
            }

            let Some((id, outcome, produced)) = running.next().await else {
                break;
            };
            state.session.conversation.extend(produced);
            state.record(&id, settle(outcome));
            self.maybe_compact(state, None).await;
            self.checkpoint(state).await?;
        }

        // 取消后未启动的节点不会再运行
        for id in graph.nodes() {
            if state.status(id) == AgentStatus::Pending {
                state.set_status(id, AgentStatus::Skipped);
            }
        }
        Ok(())
    }

    /// 依赖节点的交付物附加到查询后面
    fn with_upstream(&self, graph: &DependencyGraph, id: &str, query: &str, state: &RunState) -> String {
        let deps = graph.dependencies(id);
        if deps.is_empty() {
            return query.to_string();
        }
        let upstream: Vec<String> = deps
            .iter()
            .filter_map(|dep| state.result(dep).map(|r| format!("### {}\n{}", dep, r.summary())))
            .collect();
        format!("{}\n\nUpstream results:\n{}", query, upstream.join("\n\n"))
    }

    async fn turn(
        &self,
        team: &Team,
        agent_id: &str,
        query: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, TeamError> {
        state.active_agent = Some(agent_id.to_string());
        state.set_status(agent_id, AgentStatus::Running);
        let turn =
            TurnContext::new(cancel.clone()).with_delegates(team.allowed_delegates(agent_id));

        let outcome = self
            .executor
            .execute(agent_id, query, &mut state.session, &turn)
            .await;
        match &outcome {
            AgentOutcome::Result(result) => {
                tracing::debug!("{}", describe_result(agent_id, result));
                state.record(agent_id, result.clone());
            }
            AgentOutcome::Delegation(_) => {
                state.set_status(agent_id, AgentStatus::Completed);
                state.trace.push(agent_id.to_string());
            }
        }

        self.maybe_compact(state, None).await;
        self.checkpoint(state).await?;
        Ok(outcome)
    }

    async fn begin_delegation(
        &self,
        state: &mut RunState,
        request: &DelegationRequest,
    ) -> Result<(), TeamError> {
        state.delegations += 1;
        if state.delegations > self.max_delegations {
            tracing::warn!(
                from = %request.from_agent,
                to = %request.target,
                limit = self.max_delegations,
                "delegation limit exceeded"
            );
            return Err(TeamError::DelegationLimit(self.max_delegations));
        }
        tracing::info!(from = %request.from_agent, to = %request.target, "delegation");
        state.active_agent = Some(request.target.clone());
        self.executor
            .events()
            .emit(HiveEvent::DelegationStarted {
                from_agent: request.from_agent.clone(),
                to_agent: request.target.clone(),
                task: request.task.clone(),
            })
            .await;
        Ok(())
    }

    async fn emit_delegation_completed(&self, request: &DelegationRequest, success: bool) {
        self.executor
            .events()
            .emit(HiveEvent::DelegationCompleted {
                from_agent: request.from_agent.clone(),
                to_agent: request.target.clone(),
                success,
            })
            .await;
    }

    /// 轮次边界的预算检查；强制压缩时模型摘要失败会退回确定性摘要
    async fn maybe_compact(
        &self,
        state: &mut RunState,
        user_input: Option<&str>,
    ) -> Option<CompactionReport> {
        let decision = decide_compaction(user_input, &state.session.budget_view(), &self.budget)?;
        let conversation = &mut state.session.conversation;
        let report = match self.compactor.compact(conversation, decision.scope).await {
            Ok(report) => report,
            Err(err) if decision.mandatory => {
                tracing::warn!(error = %err, "summary model failed, using fallback summary");
                match Compactor::new(self.compactor.min_keep())
                    .compact(conversation, decision.scope)
                    .await
                {
                    Ok(report) => report,
                    Err(err) => {
                        tracing::warn!(error = %err, "fallback compaction failed");
                        return None;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "advisory compaction skipped");
                return None;
            }
        };

        if !report.is_noop() {
            self.executor
                .events()
                .emit(HiveEvent::CompactionTriggered {
                    reason: decision.reason,
                    scope: decision.scope,
                    mandatory: decision.mandatory,
                    tokens_before: report.tokens_before,
                    tokens_after: report.tokens_after,
                })
                .await;
        }
        let after = compute_budget_usage(&state.session.budget_view(), &self.budget);
        if after.over_hard() {
            tracing::warn!(
                total = after.estimated_total_tokens,
                hard_limit = after.hard_limit_tokens,
                "context still over hard limit after compaction"
            );
        }
        Some(report)
    }

    async fn checkpoint(&self, state: &RunState) -> Result<(), TeamError> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(());
        };
        checkpointer
            .save(&state.session_id, state)
            .await
            .map_err(|e| TeamError::Checkpoint(e.to_string()))
    }
}

/// 团队内委派在拓扑允许集合之外会被工具层拒绝，所以这里的 Delegation 只会来自配置错误
fn settle(outcome: AgentOutcome) -> AgentResult {
    match outcome {
        AgentOutcome::Result(result) => result,
        AgentOutcome::Delegation(request) => AgentResult::Failed {
            error: format!(
                "agent '{}' tried to delegate to '{}' where delegation is not allowed",
                request.from_agent, request.target
            ),
        },
    }
}

fn finish(agent_id: String, result: AgentResult) -> TeamOutcome {
    if result.is_completed() {
        TeamOutcome::Completed { agent_id, result }
    } else {
        TeamOutcome::Halted { agent_id, result }
    }
}

/// 并发拓扑的终态：第一个失败的 Agent，其次第一个被跳过的，否则最后一个成员
fn dag_outcome(ids: &[String], state: &RunState) -> TeamOutcome {
    for id in ids {
        if let Some(result) = state.result(id) {
            if !result.is_completed() {
                return TeamOutcome::Halted {
                    agent_id: id.clone(),
                    result: result.clone(),
                };
            }
        }
    }
    for id in ids {
        if state.status(id) != AgentStatus::Completed {
            return TeamOutcome::Halted {
                agent_id: id.clone(),
                result: AgentResult::Failed {
                    error: format!("agent '{}' was skipped", id),
                },
            };
        }
    }
    match ids.last().and_then(|id| state.result(id).map(|r| (id, r))) {
        Some((id, result)) => TeamOutcome::Completed {
            agent_id: id.clone(),
            result: result.clone(),
        },
        None => TeamOutcome::Halted {
            agent_id: String::new(),
            result: AgentResult::Failed {
                error: "no agent ran".to_string(),
            },
        },
    }
}

fn no_dependencies(ids: &[String]) -> Vec<(String, Vec<String>)> {
    ids.iter().map(|id| (id.clone(), Vec::new())).collect()
}

fn handoff_query(task: &str, from: &str, result: &AgentResult) -> String {
    format!(
        "Original task: {}\n\nPrevious agent ({}) delivered:\n{}",
        task,
        from,
        result.summary()
    )
}
