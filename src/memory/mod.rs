//! 记忆层：固定上下文、可压缩对话、上下文预算与压缩

pub mod compaction;
pub mod conversation;
pub mod pinned;
pub mod session;
pub mod token_budget;

pub use compaction::{
    decide_compaction, parse_compact_command, CompactionDecision, CompactionReason,
    CompactionReport, CompactionScope, Compactor,
};
pub use conversation::{ConversationMemory, Message, Role};
pub use pinned::{PinnedContext, TodoItem, TodoStatus};
pub use session::SessionMemory;
pub use token_budget::{
    compute_budget_usage, usage_for_input, BudgetUsage, ContextBudget, TokenEstimator,
};
