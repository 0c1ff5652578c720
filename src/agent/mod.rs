//! Agent：注册记录、注册表、单轮执行器与结果类型

pub mod context;
pub mod executor;
pub mod output;
pub mod registry;
pub mod result;
pub mod spec;

pub use context::{ContextProvider, StaticKnowledge};
pub use executor::{describe_result, AgentExecutor, TurnContext};
pub use output::{extract_json, parse_final_output};
pub use registry::AgentRegistry;
pub use result::{AgentOutcome, AgentResult, DelegationRequest};
pub use spec::{is_valid_agent_id, AgentSpec, AgentSpecBuilder, OutputSchema, DEFAULT_MAX_STEPS};
