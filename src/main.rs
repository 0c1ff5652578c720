//! Hive 演示入口
//!
//! 用 Mock 模型注册两个 Agent，按 Sequential 拓扑跑一次团队任务并输出 JSON 结果。
//! 用法：`hive [任务描述]`，配置见 config/default.toml，HIVE__* 环境变量可覆盖。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::agent::{AgentExecutor, AgentRegistry, AgentSpec, OutputSchema};
use hive::config::load_config;
use hive::core::JsonFileCheckpointer;
use hive::llm::{wrap_transport, LlmClient, MockLlmClient, RateLimiter};
use hive::team::{TeamBuilder, TeamScheduler, Topology};
use hive::tools::{EchoTool, ToolExecutor, ToolRegistry};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config = match load_config(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Config load failed ({}), using defaults", e);
            Default::default()
        }
    };
    let task = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let task = if task.trim().is_empty() {
        "Summarize the benefits of structured concurrency".to_string()
    } else {
        task
    };

    let mut registry = AgentRegistry::new();
    registry.register(
        AgentSpec::builder("researcher", "Researcher")
            .description("Collects facts for the task")
            .system_prompt("You research the task and answer with JSON.")
            .tools(["echo"])
            .output_schema(OutputSchema::json("findings", ["answer"]))
            .max_steps(config.agent.default_max_steps)
            .build()?,
    )?;
    registry.register(
        AgentSpec::builder("writer", "Writer")
            .description("Turns findings into the final answer")
            .system_prompt("You write the final answer as JSON.")
            .output_schema(OutputSchema::json("report", ["answer"]))
            .max_steps(config.agent.default_max_steps)
            .build()?,
    )?;
    let registry = Arc::new(registry);

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let transport: Arc<dyn LlmClient> = Arc::new(MockLlmClient::default());
    let llm = wrap_transport(transport, &config.llm, limiter);

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let executor = AgentExecutor::new(
        Arc::clone(&registry),
        llm,
        ToolExecutor::new(tools, Duration::from_secs(config.agent.tool_timeout_secs)),
    );
    executor.events().on_sync("*", |ev| {
        tracing::debug!(event = ev.event.event_type(), "event");
        Ok(())
    });

    let scheduler = TeamScheduler::from_config(Arc::new(executor), &config)?
        .with_checkpointer(Arc::new(JsonFileCheckpointer::new("workspace/runs")));
    let team = TeamBuilder::new("demo", Topology::Sequential)
        .agent("researcher")
        .agent("writer")
        .build(&registry)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let run = scheduler
        .run(&team, &task, cancel)
        .await
        .context("team run failed")?;
    println!("{}", serde_json::to_string_pretty(&run.outcome)?);
    Ok(())
}
