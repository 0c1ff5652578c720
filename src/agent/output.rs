//! 最终输出解析：从模型文本中提取 JSON，并按 OutputSchema 归类为 completed / needs_clarification

use serde_json::Value;

use crate::agent::{AgentResult, AgentSpec, OutputSchema};
use crate::core::AgentError;

/// 提取 JSON 片段（```json ... ``` 代码块，或第一个 '{' 到最后一个 '}'）
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 按 Agent 的输出约定解析最终回复
pub fn parse_final_output(agent: &AgentSpec, raw: &str) -> Result<AgentResult, AgentError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AgentError::EmptyResponse {
            agent_id: agent.id.clone(),
        });
    }

    let parsed: Option<Value> = extract_json(raw).and_then(|s| serde_json::from_str(s).ok());
    if let Some(clarify) = parsed.as_ref().and_then(clarification) {
        return Ok(clarify);
    }

    match &agent.output_schema {
        OutputSchema::Text { name } => Ok(AgentResult::Completed {
            deliverable: Value::String(raw.to_string()),
            deliverable_type: name.clone(),
        }),
        OutputSchema::Json { name, required } => {
            let mismatch = |reason: String| AgentError::SchemaMismatch {
                agent_id: agent.id.clone(),
                schema: name.clone(),
                reason,
            };
            let value = parsed.ok_or_else(|| mismatch("no JSON object in output".to_string()))?;
            let object = value
                .as_object()
                .ok_or_else(|| mismatch("output is not a JSON object".to_string()))?;
            let missing: Vec<&str> = required
                .iter()
                .filter(|f| !object.contains_key(f.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(mismatch(format!("missing fields: {}", missing.join(", "))));
            }
            Ok(AgentResult::Completed {
                deliverable: value,
                deliverable_type: name.clone(),
            })
        }
    }
}

/// `{"needs_clarification": true, "message": ..., "questions": [...], "options": [...]}`
fn clarification(value: &Value) -> Option<AgentResult> {
    if value.get("needs_clarification").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let strings = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let questions = strings("questions");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| questions.first().cloned())
        .unwrap_or_else(|| "more information is needed".to_string());
    Some(AgentResult::NeedsClarification {
        message,
        questions,
        options: strings("options"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(schema: OutputSchema) -> AgentSpec {
        AgentSpec::builder("analyst", "Analyst")
            .output_schema(schema)
            .build()
            .unwrap()
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("Result: {\"a\":{\"b\":2}} done"), Some("{\"a\":{\"b\":2}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_json_schema_match_and_mismatch() {
        let a = agent(OutputSchema::json("analysis", ["summary", "tables"]));
        let ok = parse_final_output(&a, r#"{"summary": "s", "tables": []}"#).unwrap();
        assert_eq!(ok.deliverable().unwrap()["summary"], "s");

        let missing = parse_final_output(&a, r#"{"summary": "s"}"#).unwrap_err();
        assert!(missing.to_string().contains("tables"));

        let prose = parse_final_output(&a, "I think the answer is 42").unwrap_err();
        assert!(matches!(prose, AgentError::SchemaMismatch { .. }));

        let empty = parse_final_output(&a, "   ").unwrap_err();
        assert!(matches!(empty, AgentError::EmptyResponse { .. }));
    }

    #[test]
    fn test_needs_clarification() {
        let a = agent(OutputSchema::json("analysis", ["summary"]));
        let r = parse_final_output(
            &a,
            r#"{"needs_clarification": true, "questions": ["which schema?"], "options": ["dw", "ods"]}"#,
        )
        .unwrap();
        assert_eq!(
            r,
            AgentResult::NeedsClarification {
                message: "which schema?".into(),
                questions: vec!["which schema?".into()],
                options: vec!["dw".into(), "ods".into()],
            }
        );
    }

    #[test]
    fn test_text_schema() {
        let a = agent(OutputSchema::text("report"));
        let r = parse_final_output(&a, "plain report").unwrap();
        assert_eq!(r.deliverable(), Some(&Value::String("plain report".into())));
    }
}
