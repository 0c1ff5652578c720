//! 委派工具
//!
//! 每个可委派目标对应一个 `delegate_to_<agent_id>` 工具。执行器在工具循环中截获这类调用，
//! 不会真的执行它，而是返回 DelegationRequest（或拒绝并回传工具错误）。

use serde_json::Value;

use crate::agent::AgentSpec;
use crate::llm::{ToolCall, ToolSpec};
use crate::tools::schema::{parameters_schema_for, DelegateArgs};

pub const DELEGATE_PREFIX: &str = "delegate_to_";

pub fn delegate_tool_name(target: &str) -> String {
    format!("{}{}", DELEGATE_PREFIX, target)
}

/// 为目标 Agent 生成委派工具描述
pub fn delegate_tool_spec(target: &AgentSpec) -> ToolSpec {
    let description = if target.description.is_empty() {
        format!("Hand control over to agent '{}' ({}).", target.id, target.name)
    } else {
        format!(
            "Hand control over to agent '{}' ({}): {}",
            target.id, target.name, target.description
        )
    };
    ToolSpec {
        name: delegate_tool_name(&target.id),
        description,
        parameters: parameters_schema_for::<DelegateArgs>(),
    }
}

/// 解析后的委派调用
#[derive(Debug, Clone, PartialEq)]
pub struct DelegateCall {
    pub target: String,
    pub task: String,
}

/// 工具调用是否为委派；是则解析出目标与任务
///
/// 参数缺少 task 时返回 Err，由调用方作为工具错误回传。
pub fn parse_delegate_call(call: &ToolCall) -> Option<Result<DelegateCall, String>> {
    let target = call.name.strip_prefix(DELEGATE_PREFIX)?;
    if target.is_empty() {
        return Some(Err("delegation target is empty".to_string()));
    }
    Some(parse_task(&call.args).map(|task| DelegateCall {
        target: target.to_string(),
        task,
    }))
}

fn parse_task(args: &Value) -> Result<String, String> {
    // 部分模型把 arguments 作为字符串返回
    let args = match args {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    };
    let parsed: DelegateArgs = serde_json::from_value(args)
        .map_err(|e| format!("invalid delegation arguments: {}", e))?;
    let task = parsed.task.trim();
    if task.is_empty() {
        return Err("delegation task must not be empty".to_string());
    }
    Ok(task.to_string())
}
