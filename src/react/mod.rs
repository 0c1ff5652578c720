//! 认知层：Planner、Reflector 与规划-执行-反思主循环

pub mod loop_;
pub mod plan;
pub mod planner;
pub mod reflector;

pub use loop_::{ReactLoop, ReactOutcome, MAX_REPLAN_DEPTH};
pub use plan::{Plan, PlanStatus, PlanTask, TaskStatus};
pub use planner::{parse_plan, Planner};
pub use reflector::{decide_next_action, parse_reflection, LoopStep, NextAction, Reflection, Reflector};
