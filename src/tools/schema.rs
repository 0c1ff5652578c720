//! 工具参数 JSON Schema 生成（schemars）
//!
//! 绑定给模型的每个工具都带一份参数 schema；委派工具的参数固定为 DelegateArgs。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

/// 委派工具参数：交给目标 Agent 的任务描述
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// 目标 Agent 需要完成的任务
    pub task: String,
}

/// Echo 工具参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// 原样返回的文本
    pub text: String,
}

/// 类型 T 的参数 schema（JSON 值）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({
            "type": "object",
            "properties": {},
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegate_schema_requires_task() {
        let schema = parameters_schema_for::<DelegateArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].get("task").is_some());
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["task"]);
    }
}
