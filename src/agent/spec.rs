//! Agent 注册记录与校验构建器
//!
//! AgentSpec 创建后不可变；所有校验在 build() 时一次完成，失败返回 ConfigError。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::core::ConfigError;

pub const DEFAULT_MAX_STEPS: usize = 10;

/// 输出格式约定
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSchema {
    /// 输出必须是 JSON 对象，且包含 required 中的全部字段
    Json { name: String, required: Vec<String> },
    /// 纯文本输出（非空即可）
    Text { name: String },
}

impl OutputSchema {
    pub fn json<I, S>(name: impl Into<String>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OutputSchema::Json {
            name: name.into(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        OutputSchema::Text { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            OutputSchema::Json { name, .. } | OutputSchema::Text { name } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub can_delegate_to: Vec<String>,
    pub knowledge_domains: Vec<String>,
    pub output_schema: OutputSchema,
    pub temperature: f32,
    pub max_steps: usize,
}

impl AgentSpec {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> AgentSpecBuilder {
        AgentSpecBuilder::new(id, name)
    }

    pub fn may_delegate_to(&self, target: &str) -> bool {
        self.can_delegate_to.iter().any(|t| t == target)
    }
}

fn agent_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").ok())
        .as_ref()
}

pub fn is_valid_agent_id(id: &str) -> bool {
    agent_id_pattern().map(|re| re.is_match(id)).unwrap_or(false)
}

pub struct AgentSpecBuilder {
    id: String,
    name: String,
    description: String,
    system_prompt: String,
    tools: Vec<String>,
    can_delegate_to: Vec<String>,
    knowledge_domains: Vec<String>,
    output_schema: Option<OutputSchema>,
    temperature: f32,
    max_steps: usize,
}

impl AgentSpecBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            tools: Vec::new(),
            can_delegate_to: Vec::new(),
            knowledge_domains: Vec::new(),
            output_schema: None,
            temperature: 0.0,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn can_delegate_to<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.can_delegate_to = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn knowledge_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.knowledge_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn build(self) -> Result<AgentSpec, ConfigError> {
        if !is_valid_agent_id(&self.id) {
            return Err(ConfigError::InvalidAgentId(self.id));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName(self.id));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::TemperatureOutOfRange {
                agent_id: self.id,
                value: self.temperature,
            });
        }
        if self.max_steps == 0 {
            return Err(ConfigError::InvalidMaxSteps(self.id));
        }
        let output_schema = match self.output_schema {
            Some(schema) if !schema.name().trim().is_empty() => schema,
            _ => return Err(ConfigError::MissingOutputSchema(self.id)),
        };
        if self.can_delegate_to.iter().any(|t| t == &self.id) {
            return Err(ConfigError::SelfDelegation(self.id));
        }

        let mut can_delegate_to: Vec<String> = Vec::with_capacity(self.can_delegate_to.len());
        for target in self.can_delegate_to {
            if !can_delegate_to.contains(&target) {
                can_delegate_to.push(target);
            }
        }

        Ok(AgentSpec {
            id: self.id,
            name: self.name,
            description: self.description,
            system_prompt: self.system_prompt,
            tools: self.tools,
            can_delegate_to,
            knowledge_domains: self.knowledge_domains,
            output_schema,
            temperature: self.temperature,
            max_steps: self.max_steps,
        })
    }
}
