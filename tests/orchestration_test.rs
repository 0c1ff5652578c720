//! 编排内核集成测试：限流、团队调度、委派拒绝、上下文预算与压缩、ReAct 决策表

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use hive::agent::{AgentExecutor, AgentRegistry, AgentSpec, OutputSchema};
    use hive::config::{ProviderLimit, RateLimitSection};
    use hive::core::{Checkpointer, JsonFileCheckpointer};
    use hive::events::{EventBus, WILDCARD};
    use hive::llm::{
        InvokeOptions, LlmClient, LlmError, MockLlmClient, ModelResponse, RateLimitedLlm,
        RateLimiter, ScriptedLlmClient,
    };
    use hive::memory::{
        decide_compaction, CompactionReason, CompactionScope, ContextBudget, Message,
    };
    use hive::react::{decide_next_action, parse_reflection, LoopStep, Plan};
    use hive::team::{AgentStatus, RunState, TeamBuilder, TeamOutcome, TeamScheduler, Topology};
    use hive::tools::{ToolExecutor, ToolRegistry};
    use tokio_util::sync::CancellationToken;

    /// 记录同时在途调用数的慢模型
    #[derive(Default)]
    struct SlowLlm {
        current: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for SlowLlm {
        fn provider(&self) -> &str {
            "slow"
        }

        async fn invoke(
            &self,
            _messages: &[Message],
            _options: &InvokeOptions,
        ) -> Result<ModelResponse, LlmError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse::text("ok"))
        }
    }

    fn text_agent(id: &str, targets: &[&str]) -> AgentSpec {
        AgentSpec::builder(id, id)
            .can_delegate_to(targets.iter().copied())
            .output_schema(OutputSchema::text("text"))
            .build()
            .unwrap()
    }

    fn executor_with(
        specs: Vec<AgentSpec>,
        llms: Vec<(&str, Arc<ScriptedLlmClient>)>,
        events: EventBus,
    ) -> (Arc<AgentRegistry>, Arc<AgentExecutor>) {
        let mut registry = AgentRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }
        let registry = Arc::new(registry);
        let mut executor = AgentExecutor::new(
            Arc::clone(&registry),
            Arc::new(MockLlmClient::default()),
            ToolExecutor::new(ToolRegistry::new(), Duration::from_secs(5)),
        )
        .with_events(events);
        for (id, llm) in llms {
            executor = executor.with_agent_llm(id, llm);
        }
        (registry, Arc::new(executor))
    }

    /// 按事件类型计数
    fn count_events(bus: &EventBus) -> Arc<Mutex<HashMap<String, usize>>> {
        let counts = Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::clone(&counts);
        bus.on_sync(WILDCARD, move |ev| {
            let mut counts = sink.lock().unwrap();
            *counts.entry(ev.event.event_type().to_string()).or_insert(0) += 1;
            Ok(())
        });
        counts
    }

    #[tokio::test(start_paused = true)]
    async fn test_twenty_callers_respect_max_concurrent() {
        let limiter = Arc::new(RateLimiter::new(RateLimitSection {
            enabled: true,
            default: ProviderLimit {
                rpm: 60,
                max_concurrent: 5,
            },
            providers: HashMap::new(),
        }));
        let slow = Arc::new(SlowLlm::default());
        let llm: Arc<dyn LlmClient> = Arc::new(RateLimitedLlm::new(slow.clone(), limiter.clone()));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let llm = Arc::clone(&llm);
                tokio::spawn(async move {
                    llm.invoke(&[Message::user(format!("call {}", i))], &InvokeOptions::default())
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert!(slow.peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(slow.done.load(Ordering::SeqCst), 20);
        let stats = limiter.stats("slow").await.unwrap();
        assert_eq!(stats.total_requests, 20);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_sequential_failure_at_second_agent() {
        let events = EventBus::new();
        let counts = count_events(&events);
        let third = Arc::new(ScriptedLlmClient::texts(["never"]));
        let (registry, executor) = executor_with(
            vec![text_agent("intake", &[]), text_agent("review", &[]), text_agent("publish", &[])],
            vec![
                ("intake", Arc::new(ScriptedLlmClient::texts(["ticket parsed"]))),
                ("review", Arc::new(ScriptedLlmClient::texts([""]))),
                ("publish", third.clone()),
            ],
            events,
        );
        let team = TeamBuilder::new("pipeline", Topology::Sequential)
            .agent("intake")
            .agent("review")
            .agent("publish")
            .build(&registry)
            .unwrap();

        let run = TeamScheduler::new(executor)
            .run(&team, "handle ticket", CancellationToken::new())
            .await
            .unwrap();

        match &run.outcome {
            TeamOutcome::Halted { agent_id, result } => {
                assert_eq!(agent_id, "review");
                assert_eq!(result.status(), "failed");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(third.invocation_count(), 0);
        assert_eq!(run.state.status("publish"), AgentStatus::Pending);
        let counts = counts.lock().unwrap();
        assert_eq!(counts.get("agent.started"), Some(&2));
        assert_eq!(counts.get("agent.failed"), Some(&1));
    }

    #[tokio::test]
    async fn test_out_of_set_delegation_is_tool_error() {
        let events = EventBus::new();
        let counts = count_events(&events);
        let lead = Arc::new(ScriptedLlmClient::new([
            Ok(ModelResponse::tool_call(
                "delegate_to_auditor",
                serde_json::json!({"task": "audit"}),
            )),
            Ok(ModelResponse::text("handled it myself")),
        ]));
        let auditor = Arc::new(ScriptedLlmClient::texts(["audited"]));
        let (registry, executor) = executor_with(
            vec![
                text_agent("lead", &["coder"]),
                text_agent("coder", &[]),
                text_agent("auditor", &[]),
            ],
            vec![
                ("lead", lead.clone()),
                ("coder", Arc::new(ScriptedLlmClient::texts(["code"]))),
                ("auditor", auditor.clone()),
            ],
            events,
        );
        let team = TeamBuilder::new("dyn", Topology::Dynamic)
            .agent("lead")
            .agent("coder")
            .agent("auditor")
            .build(&registry)
            .unwrap();

        let run = TeamScheduler::new(executor)
            .run(&team, "ship", CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(&run.outcome, TeamOutcome::Completed { agent_id, .. } if agent_id == "lead"));
        assert_eq!(auditor.invocation_count(), 0);
        assert_eq!(run.state.delegations, 0);
        let lead_calls = lead.calls();
        let retry = &lead_calls[1];
        assert!(retry
            .messages
            .iter()
            .any(|m| m.content.starts_with("Error:")));
        assert_eq!(counts.lock().unwrap().get("tool.failed"), Some(&1));
    }

    #[test]
    fn test_budget_850_is_advisory_both() {
        let budget = ContextBudget::new(1000, 100, 50, 0.8, 0.95).unwrap();
        // 2776 个 ASCII 字符 -> 694 token，加每条 6 的开销 = 700
        let messages = vec![Message::user("a".repeat(2776))];
        let decision = decide_compaction(None, &messages, &budget).unwrap();
        assert_eq!(decision.usage.estimated_input_tokens, 700);
        assert_eq!(decision.usage.estimated_total_tokens, 850);
        assert_eq!(decision.usage.soft_limit_tokens, 800);
        assert_eq!(decision.usage.hard_limit_tokens, 950);
        assert_eq!(decision.reason, CompactionReason::BudgetSoft);
        assert_eq!(decision.scope, CompactionScope::Both);
        assert!(!decision.mandatory);

        // 手动指令优先
        let manual = decide_compaction(Some("/compact todo"), &messages, &budget).unwrap();
        assert_eq!(manual.reason, CompactionReason::Manual);
        assert_eq!(manual.scope, CompactionScope::Requirement);
        assert!(manual.mandatory);
    }

    #[test]
    fn test_reflection_decision_table() {
        let plan = Plan::new("goal", 3);
        let table = [
            ("complete", LoopStep::Success),
            ("fail", LoopStep::Failure),
            ("replan", LoopStep::Planner),
            ("retry", LoopStep::Executor),
            ("continue", LoopStep::Executor),
            ("escalate", LoopStep::Failure),
        ];
        for (action, expected) in table {
            let raw = format!(r#"{{"next_action": "{}", "confidence": 0.5}}"#, action);
            assert_eq!(decide_next_action(&plan, &parse_reflection(&raw)), expected);
        }
        assert_eq!(
            decide_next_action(&plan, &parse_reflection("not json")),
            LoopStep::Failure
        );
    }

    #[tokio::test]
    async fn test_manual_compaction_is_idempotent_and_keeps_pinned() {
        let (registry, executor) = executor_with(
            vec![text_agent("solo", &[])],
            vec![("solo", Arc::new(ScriptedLlmClient::texts(["unused"])))],
            EventBus::new(),
        );
        let team = TeamBuilder::new("solo", Topology::Sequential)
            .agent("solo")
            .build(&registry)
            .unwrap();
        let scheduler = TeamScheduler::new(executor);

        let mut state = RunState::new("compact-session");
        state.session.pinned.decisions.push("use postgres".to_string());
        for i in 0..10 {
            state.session.push(Message::user(format!("requirement {}", i)));
            state.session.push(Message::assistant(format!("noted {}", i)));
        }

        let first = scheduler
            .run_with_state(&team, "/compress", state, CancellationToken::new())
            .await
            .unwrap();
        let TeamOutcome::Compacted { report } = &first.outcome else {
            panic!("expected compaction, got {:?}", first.outcome);
        };
        assert_eq!(report.compacted_messages, 16);

        let second = scheduler
            .run_with_state(&team, "/compress", first.state, CancellationToken::new())
            .await
            .unwrap();
        let TeamOutcome::Compacted { report } = &second.outcome else {
            panic!("expected compaction, got {:?}", second.outcome);
        };
        assert!(report.is_noop());
        assert_eq!(second.state.session.pinned.decisions, vec!["use postgres".to_string()]);
        assert_eq!(second.state.session.conversation.len(), 4);
    }

    #[tokio::test]
    async fn test_checkpoint_resume_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileCheckpointer::new(dir.path()));
        let (registry, executor) = executor_with(
            vec![text_agent("solo", &[])],
            vec![(
                "solo",
                Arc::new(ScriptedLlmClient::texts(["first answer", "second answer"])),
            )],
            EventBus::new(),
        );
        let team = TeamBuilder::new("solo", Topology::Sequential)
            .agent("solo")
            .build(&registry)
            .unwrap();
        let scheduler = TeamScheduler::new(executor).with_checkpointer(store.clone());

        let run = scheduler
            .run(&team, "first question", CancellationToken::new())
            .await
            .unwrap();
        let session_id = run.state.session_id.clone();

        let restored = store.load(&session_id).await.unwrap().unwrap();
        assert_eq!(restored.session.conversation.len(), 2);
        let resumed = scheduler
            .run_with_state(&team, "second question", restored, CancellationToken::new())
            .await
            .unwrap();
        assert!(resumed.outcome.is_completed());
        assert_eq!(resumed.state.session.conversation.len(), 4);
        assert_eq!(resumed.state.trace, vec!["solo", "solo"]);
    }
}
