//! Agent 执行器：单个 Agent 的一轮
//!
//! 组装上下文（system + 固定层 + 知识 + 经验 + 历史 + 本轮输入）后进入有界工具循环：
//! - 模型不再请求工具 -> 解析最终输出
//! - 请求 delegate_to_* -> 校验通过则立即返回 DelegationRequest，否则回传工具错误继续循环
//! - 其他工具 -> 带超时执行，结果写回历史
//!
//! 本轮产生的消息无论成败都会写回 SessionMemory 的对话层。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::agent::output::parse_final_output;
use crate::agent::{
    AgentOutcome, AgentRegistry, AgentResult, AgentSpec, ContextProvider, DelegationRequest,
    OutputSchema,
};
use crate::core::{AgentError, RecoveryEngine};
use crate::events::{EventBus, HiveEvent};
use crate::llm::{LlmClient, LlmClientExt, ToolCall};
use crate::memory::{Message, SessionMemory};
use crate::observability::truncate_summary;
use crate::tools::{delegate_tool_spec, parse_delegate_call, DelegateCall, ToolExecutor};

const SUMMARY_CHARS: usize = 200;

/// 单轮调用参数：取消信号 + 拓扑允许的委派目标（空集合表示本轮不可委派）
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub cancel: CancellationToken,
    pub allowed_delegates: HashSet<String>,
}

impl TurnContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            allowed_delegates: HashSet::new(),
        }
    }

    pub fn with_delegates<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_delegates = targets.into_iter().map(Into::into).collect();
        self
    }
}

pub struct AgentExecutor {
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LlmClient>,
    agent_llms: HashMap<String, Arc<dyn LlmClient>>,
    tools: ToolExecutor,
    events: EventBus,
    knowledge: Option<Arc<dyn ContextProvider>>,
    experience: Option<Arc<dyn ContextProvider>>,
    recovery: RecoveryEngine,
}

impl AgentExecutor {
    /// llm 应为已叠加限流的客户端（见 `llm::wrap_transport`）
    pub fn new(registry: Arc<AgentRegistry>, llm: Arc<dyn LlmClient>, tools: ToolExecutor) -> Self {
        Self {
            registry,
            llm,
            agent_llms: HashMap::new(),
            tools,
            events: EventBus::new(),
            knowledge: None,
            experience: None,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// 为某个 Agent 指定独立的模型客户端
    pub fn with_agent_llm(mut self, agent_id: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        self.agent_llms.insert(agent_id.into(), llm);
        self
    }

    pub fn with_knowledge(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.knowledge = Some(provider);
        self
    }

    pub fn with_experience(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.experience = Some(provider);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn default_llm(&self) -> Arc<dyn LlmClient> {
        Arc::clone(&self.llm)
    }

    pub fn llm_for(&self, agent_id: &str) -> Arc<dyn LlmClient> {
        self.agent_llms
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.llm))
    }

    pub async fn execute(
        &self,
        agent_id: &str,
        query: &str,
        session: &mut SessionMemory,
        turn: &TurnContext,
    ) -> AgentOutcome {
        let start = Instant::now();
        let Some(spec) = self.registry.get(agent_id) else {
            let err = AgentError::UnknownAgent(agent_id.to_string());
            self.emit_failed(agent_id, start, &err.to_string()).await;
            return self.recovery.to_result(&err).into();
        };

        self.events
            .emit(HiveEvent::AgentStarted {
                agent_id: spec.id.clone(),
                query: truncate_summary(query, SUMMARY_CHARS),
            })
            .await;
        tracing::info!(agent_id = %spec.id, max_steps = spec.max_steps, "agent turn started");

        let mut turn_messages = vec![Message::user(query)];
        let outcome = self.run_loop(&spec, session, turn, &mut turn_messages).await;
        session.conversation.extend(turn_messages);

        match outcome {
            Ok(AgentOutcome::Delegation(request)) => {
                self.emit_completed(&spec.id, start, format!("delegated to {}", request.target))
                    .await;
                AgentOutcome::Delegation(request)
            }
            Ok(AgentOutcome::Result(result)) => {
                self.emit_completed(&spec.id, start, result.summary()).await;
                AgentOutcome::Result(result)
            }
            Err(err) => {
                let result = self.recovery.to_result(&err);
                tracing::warn!(agent_id = %spec.id, status = result.status(), error = %err, "agent turn failed");
                self.emit_failed(&spec.id, start, &err.to_string()).await;
                AgentOutcome::Result(result)
            }
        }
    }

    async fn run_loop(
        &self,
        spec: &AgentSpec,
        session: &SessionMemory,
        turn: &TurnContext,
        turn_messages: &mut Vec<Message>,
    ) -> Result<AgentOutcome, AgentError> {
        let query = turn_messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let context = self.build_context(spec, &query, session).await;

        let mut bound_tools = self.tools.specs_for(&spec.tools);
        bound_tools.extend(
            self.delegation_targets(spec, turn)
                .iter()
                .map(|target| delegate_tool_spec(target)),
        );
        let llm = self
            .llm_for(&spec.id)
            .bind_tools(bound_tools)
            .with_temperature(spec.temperature);

        for step in 1..=spec.max_steps {
            let mut messages = context.clone();
            messages.extend(turn_messages.iter().cloned());

            let response = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => return Err(AgentError::Cancelled),
                r = llm.invoke(&messages) => r.map_err(|source| AgentError::Llm {
                    agent_id: spec.id.clone(),
                    step,
                    source,
                })?,
            };

            if !response.has_tool_calls() {
                let text = response.text_content().unwrap_or_default().to_string();
                if !text.is_empty() {
                    turn_messages.push(Message::assistant(text.clone()));
                }
                tracing::debug!(agent_id = %spec.id, step, "final answer received");
                return parse_final_output(spec, &text).map(AgentOutcome::Result);
            }

            turn_messages.push(Message::assistant_with_tool_calls(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            ));

            for (idx, call) in response.tool_calls.iter().enumerate() {
                if let Some(parsed) = parse_delegate_call(call) {
                    match parsed.and_then(|d| self.check_delegation(spec, d, turn)) {
                        Ok(delegate) => {
                            turn_messages.push(Message::tool(
                                call.id.clone(),
                                format!("control handed over to '{}'", delegate.target),
                            ));
                            for skipped in &response.tool_calls[idx + 1..] {
                                turn_messages.push(Message::tool(
                                    skipped.id.clone(),
                                    "skipped: control was handed over",
                                ));
                            }
                            tracing::info!(agent_id = %spec.id, target = %delegate.target, step, "delegation requested");
                            return Ok(AgentOutcome::Delegation(DelegationRequest {
                                from_agent: spec.id.clone(),
                                target: delegate.target,
                                task: delegate.task,
                                handover: turn_messages.clone(),
                            }));
                        }
                        Err(reason) => {
                            self.reject_call(spec, call, &reason, turn_messages).await;
                        }
                    }
                    continue;
                }

                if !spec.tools.iter().any(|t| t == &call.name) {
                    let reason = format!("tool '{}' is not available to this agent", call.name);
                    self.reject_call(spec, call, &reason, turn_messages).await;
                    continue;
                }

                let content = self.run_tool(spec, call, turn).await?;
                turn_messages.push(Message::tool(call.id.clone(), content));
            }
        }

        Err(AgentError::StepsExhausted {
            agent_id: spec.id.clone(),
            max_steps: spec.max_steps,
        })
    }

    /// 执行普通工具；工具自身报错回传给模型，超时与取消中止本轮
    async fn run_tool(
        &self,
        spec: &AgentSpec,
        call: &ToolCall,
        turn: &TurnContext,
    ) -> Result<String, AgentError> {
        self.events
            .emit(HiveEvent::ToolCalled {
                agent_id: spec.id.clone(),
                tool: call.name.clone(),
                args: call.args.clone(),
            })
            .await;
        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.tools.execute(&call.name, call.args.clone()) => r,
        };
        match result {
            Ok(output) => {
                self.events
                    .emit(HiveEvent::ToolCompleted {
                        agent_id: spec.id.clone(),
                        tool: call.name.clone(),
                        duration_ms: start.elapsed().as_millis() as u64,
                        preview: truncate_summary(&output, SUMMARY_CHARS),
                    })
                    .await;
                Ok(output)
            }
            Err(AgentError::ToolExecutionFailed(e)) | Err(AgentError::HallucinatedTool(e)) => {
                self.events
                    .emit(HiveEvent::ToolFailed {
                        agent_id: spec.id.clone(),
                        tool: call.name.clone(),
                        error: e.clone(),
                    })
                    .await;
                Ok(format!("Error: {}", e))
            }
            Err(e) => {
                self.events
                    .emit(HiveEvent::ToolFailed {
                        agent_id: spec.id.clone(),
                        tool: call.name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn reject_call(
        &self,
        spec: &AgentSpec,
        call: &ToolCall,
        reason: &str,
        turn_messages: &mut Vec<Message>,
    ) {
        tracing::warn!(agent_id = %spec.id, tool = %call.name, reason, "tool call rejected");
        self.events
            .emit(HiveEvent::ToolFailed {
                agent_id: spec.id.clone(),
                tool: call.name.clone(),
                error: reason.to_string(),
            })
            .await;
        turn_messages.push(Message::tool(call.id.clone(), format!("Error: {}", reason)));
    }

    /// 可委派目标 = 自身声明 ∩ 拓扑允许 ∩ 已注册
    fn delegation_targets(&self, spec: &AgentSpec, turn: &TurnContext) -> Vec<Arc<AgentSpec>> {
        spec.can_delegate_to
            .iter()
            .filter(|t| turn.allowed_delegates.contains(t.as_str()))
            .filter_map(|t| self.registry.get(t))
            .collect()
    }

    fn check_delegation(
        &self,
        spec: &AgentSpec,
        call: DelegateCall,
        turn: &TurnContext,
    ) -> Result<DelegateCall, String> {
        if !spec.may_delegate_to(&call.target) {
            return Err(format!(
                "agent '{}' is not allowed to delegate to '{}'",
                spec.id, call.target
            ));
        }
        if !turn.allowed_delegates.contains(&call.target) {
            return Err(format!(
                "delegation to '{}' is not permitted in this team",
                call.target
            ));
        }
        if !self.registry.contains(&call.target) {
            return Err(format!("agent '{}' is not registered", call.target));
        }
        Ok(call)
    }

    async fn build_context(
        &self,
        spec: &AgentSpec,
        query: &str,
        session: &SessionMemory,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(system_prompt(spec))];

        let pinned = session.pinned.to_prompt_section();
        if !pinned.is_empty() {
            messages.push(Message::system(pinned));
        }
        if let Some(provider) = &self.knowledge {
            if let Some(text) = provider.provide(spec, query).await.filter(|t| !t.trim().is_empty()) {
                messages.push(Message::system(format!("## Knowledge\n{}", text)));
            }
        }
        if let Some(provider) = &self.experience {
            if let Some(text) = provider.provide(spec, query).await.filter(|t| !t.trim().is_empty()) {
                messages.push(Message::system(format!("## Experience\n{}", text)));
            }
        }
        messages.extend(session.conversation.to_llm_messages());
        messages
    }

    async fn emit_completed(&self, agent_id: &str, start: Instant, summary: String) {
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(agent_id, duration_ms, "agent turn finished");
        self.events
            .emit(HiveEvent::AgentCompleted {
                agent_id: agent_id.to_string(),
                duration_ms,
                summary: truncate_summary(&summary, SUMMARY_CHARS),
            })
            .await;
    }

    async fn emit_failed(&self, agent_id: &str, start: Instant, error: &str) {
        self.events
            .emit(HiveEvent::AgentFailed {
                agent_id: agent_id.to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
                error: truncate_summary(error, SUMMARY_CHARS),
            })
            .await;
    }
}

fn system_prompt(spec: &AgentSpec) -> String {
    let mut prompt = if spec.system_prompt.trim().is_empty() {
        format!("You are {}.", spec.name)
    } else {
        spec.system_prompt.clone()
    };
    if !spec.description.is_empty() {
        prompt.push_str(&format!("\nRole: {}", spec.description));
    }
    match &spec.output_schema {
        OutputSchema::Json { required, .. } if !required.is_empty() => {
            prompt.push_str(&format!(
                "\nRespond with a single JSON object containing the fields: {}.",
                required.join(", ")
            ));
        }
        OutputSchema::Json { .. } => {
            prompt.push_str("\nRespond with a single JSON object.");
        }
        OutputSchema::Text { .. } => {}
    }
    prompt.push_str(
        "\nIf the request is ambiguous, respond with {\"needs_clarification\": true, \"message\": ..., \"questions\": [...], \"options\": [...]}.",
    );
    prompt
}

/// 把失败结果折叠成可读的一行（调度器汇报用）
pub fn describe_result(agent_id: &str, result: &AgentResult) -> String {
    format!("{} -> {}: {}", agent_id, result.status(), result.summary())
}
