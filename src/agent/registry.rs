//! Agent 注册表：进程内显式持有，按 id 查找（保留注册顺序）

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::AgentSpec;
use crate::core::ConfigError;

#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    specs: HashMap<String, Arc<AgentSpec>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: AgentSpec) -> Result<(), ConfigError> {
        if self.specs.contains_key(&spec.id) {
            return Err(ConfigError::DuplicateAgent(spec.id));
        }
        tracing::debug!(agent_id = %spec.id, tools = spec.tools.len(), "agent registered");
        self.order.push(spec.id.clone());
        self.specs.insert(spec.id.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentSpec>> {
        self.specs.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::OutputSchema;

    fn spec(id: &str) -> AgentSpec {
        AgentSpec::builder(id, id)
            .output_schema(OutputSchema::text("text"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = AgentRegistry::new();
        registry.register(spec("b")).unwrap();
        registry.register(spec("a")).unwrap();
        assert_eq!(registry.ids(), &["b".to_string(), "a".to_string()]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
        assert_eq!(
            registry.register(spec("a")).unwrap_err(),
            ConfigError::DuplicateAgent("a".into())
        );
    }
}
