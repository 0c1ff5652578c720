//! Echo 工具（测试与演示用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::schema::{parameters_schema_for, EchoArgs};
use crate::tools::Tool;

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<EchoArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<String, String> {
        let args: EchoArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid echo args: {}", e))?;
        Ok(args.text)
    }
}
