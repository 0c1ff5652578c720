//! Hive - Rust 多智能体编排内核
//!
//! 模块划分：
//! - **agent**: Agent 注册、单轮执行器（工具循环 + 委派）、输出解析
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、失败归类、运行状态存档
//! - **events**: 生命周期事件总线
//! - **llm**: 模型客户端抽象、限流、重试、熔断
//! - **memory**: 会话记忆、上下文预算与压缩
//! - **observability**: tracing 初始化
//! - **react**: Planner、Reflector 与规划-执行-反思循环
//! - **team**: 团队构建与五种拓扑调度
//! - **tools**: 工具 trait、注册表与带超时的执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod events;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod team;
pub mod tools;

pub use agent::{AgentExecutor, AgentRegistry, AgentResult, AgentSpec};
pub use events::{EventBus, HiveEvent};
pub use team::{TeamBuilder, TeamScheduler, Topology};
