//! 团队：成员校验、依赖图与按拓扑调度

pub mod builder;
pub mod graph;
pub mod map_plan;
pub mod scheduler;
pub mod types;

pub use builder::{Team, TeamBuilder, TeamMember};
pub use graph::DependencyGraph;
pub use map_plan::{parse_map_plan, MapPlan, MapPlanner, MapSlice};
pub use scheduler::{TeamScheduler, DEFAULT_MAX_DELEGATIONS};
pub use types::{AgentStatus, RunState, TeamOutcome, TeamRun, Topology};
