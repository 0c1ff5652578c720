pub mod delegate;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use delegate::{delegate_tool_name, delegate_tool_spec, parse_delegate_call, DelegateCall};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::{parameters_schema_for, DelegateArgs};
