//! 核心层：错误分类、失败归类、运行状态存档

pub mod checkpoint;
pub mod error;
pub mod recovery;

pub use checkpoint::{Checkpointer, InMemoryCheckpointer, JsonFileCheckpointer};
pub use error::{AgentError, ConfigError, FailureKind, PlanError, TeamError};
pub use recovery::RecoveryEngine;
