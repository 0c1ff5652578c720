//! 知识 / 经验上下文提供者
//!
//! 返回一段纯文本，原样拼进 prompt；None 或空串表示没有可用内容。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::agent::AgentSpec;

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn provide(&self, agent: &AgentSpec, query: &str) -> Option<String>;
}

/// 按知识域返回固定文本；Agent 声明了多个域时依次拼接
#[derive(Debug, Default, Clone)]
pub struct StaticKnowledge {
    by_domain: HashMap<String, String>,
}

impl StaticKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: impl Into<String>, text: impl Into<String>) -> Self {
        self.by_domain.insert(domain.into(), text.into());
        self
    }
}

#[async_trait]
impl ContextProvider for StaticKnowledge {
    async fn provide(&self, agent: &AgentSpec, _query: &str) -> Option<String> {
        let blocks: Vec<&str> = agent
            .knowledge_domains
            .iter()
            .filter_map(|d| self.by_domain.get(d))
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
            .collect();
        if blocks.is_empty() {
            None
        } else {
            Some(blocks.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::OutputSchema;

    #[tokio::test]
    async fn test_static_knowledge_by_domain() {
        let kb = StaticKnowledge::new()
            .with_domain("warehouse", "orders lives in dw.orders")
            .with_domain("finance", "fiscal year starts in April");
        let agent = AgentSpec::builder("analyst", "Analyst")
            .knowledge_domains(["warehouse", "unknown"])
            .output_schema(OutputSchema::text("text"))
            .build()
            .unwrap();
        assert_eq!(
            kb.provide(&agent, "q").await.as_deref(),
            Some("orders lives in dw.orders")
        );

        let bare = AgentSpec::builder("bare", "Bare")
            .output_schema(OutputSchema::text("text"))
            .build()
            .unwrap();
        assert!(kb.provide(&bare, "q").await.is_none());
    }
}
