//! 错误分类
//!
//! - ConfigError：注册期校验失败，致命，不可恢复
//! - AgentError：单轮执行内部故障，由执行器归类为 failed / system_error
//! - TeamError：团队校验与运行期错误
//! - PlanError：规划器输出不可用

use thiserror::Error;

use crate::llm::LlmError;

/// 注册与配置期错误（Agent id 格式、缺少 schema、数值越界等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid agent id '{0}': must match ^[a-z][a-z0-9_]*$")]
    InvalidAgentId(String),

    #[error("agent '{0}': name must not be empty")]
    EmptyName(String),

    #[error("agent '{agent_id}': temperature {value} out of range 0.0..=2.0")]
    TemperatureOutOfRange { agent_id: String, value: f32 },

    #[error("agent '{0}': max_steps must be >= 1")]
    InvalidMaxSteps(String),

    #[error("agent '{0}': output schema is required")]
    MissingOutputSchema(String),

    #[error("agent '{0}' cannot delegate to itself")]
    SelfDelegation(String),

    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("context budget: hard_limit_ratio {hard} < soft_limit_ratio {soft}")]
    InvalidBudgetRatios { soft: f64, hard: f64 },

    #[error("context budget: {0}")]
    InvalidBudget(String),
}

/// Agent 单轮运行中的错误（网络、解析、工具、取消等），携带 agent / step 上下文
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent '{0}' is not registered")]
    UnknownAgent(String),

    #[error("[{agent_id}] step {step}: model call failed: {source}")]
    Llm {
        agent_id: String,
        step: usize,
        #[source]
        source: LlmError,
    },

    #[error("[{agent_id}] model returned an empty response")]
    EmptyResponse { agent_id: String },

    #[error("[{agent_id}] output does not match schema '{schema}': {reason}")]
    SchemaMismatch {
        agent_id: String,
        schema: String,
        reason: String,
    },

    #[error("[{agent_id}] exhausted {max_steps} steps without a final answer")]
    StepsExhausted { agent_id: String, max_steps: usize },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 团队校验与运行错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TeamError {
    #[error("team has no agents")]
    EmptyTeam,

    #[error("agent '{0}' is not registered")]
    UnknownAgent(String),

    #[error("agent '{0}' appears twice in the team")]
    DuplicateMember(String),

    #[error("map-reduce team needs at least 2 agents, got {0}")]
    MapReduceTooSmall(usize),

    #[error("agent '{agent}' depends on '{dependency}' which is not in the team")]
    UnknownDependency { agent: String, dependency: String },

    #[error("dependency cycle detected among: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("delegation limit {0} exceeded")]
    DelegationLimit(usize),

    #[error("checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("map-reduce split failed: {0}")]
    MapSplit(#[from] PlanError),
}

/// 规划器输出错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("planner model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("planner output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("plan has no tasks")]
    EmptyPlan,

    #[error("task {task} is assigned to unknown agent '{agent}'")]
    UnknownAgent { task: String, agent: String },

    #[error("task {task} depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("plan dependencies form a cycle among: {0:?}")]
    DependencyCycle(Vec<String>),
}

/// 失败归类：业务失败（调用方输入 / 模型输出问题）与系统故障（内部异常）
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Business,
    System,
}
