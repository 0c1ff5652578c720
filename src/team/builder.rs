//! 团队构建器
//!
//! 在 build 时一次性校验成员与依赖；委派目标越界只记警告，由工具层在运行时拒绝。

use std::collections::HashSet;

use crate::agent::AgentRegistry;
use crate::core::TeamError;
use crate::team::{DependencyGraph, Topology};

#[derive(Debug, Clone)]
pub struct TeamMember {
    pub agent_id: String,
    /// 仅 Parallel 拓扑使用
    pub depends_on: Vec<String>,
}

/// 校验通过的团队
#[derive(Debug, Clone)]
pub struct Team {
    pub name: String,
    pub topology: Topology,
    pub members: Vec<TeamMember>,
    pub graph: Option<DependencyGraph>,
    pub warnings: Vec<String>,
}

impl Team {
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.agent_id.clone()).collect()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m.agent_id == agent_id)
    }

    /// 入口 Agent（Hierarchical 下即经理）
    pub fn entry(&self) -> &str {
        self.members
            .first()
            .map(|m| m.agent_id.as_str())
            .unwrap_or_default()
    }

    /// 拓扑允许 agent_id 委派的目标集合
    pub fn allowed_delegates(&self, agent_id: &str) -> Vec<String> {
        let others = || -> Vec<String> {
            self.members
                .iter()
                .filter(|m| m.agent_id != agent_id)
                .map(|m| m.agent_id.clone())
                .collect()
        };
        match self.topology {
            Topology::Dynamic => others(),
            Topology::Hierarchical if agent_id == self.entry() => others(),
            _ => Vec::new(),
        }
    }
}

pub struct TeamBuilder {
    name: String,
    topology: Topology,
    members: Vec<TeamMember>,
}

impl TeamBuilder {
    pub fn new(name: impl Into<String>, topology: Topology) -> Self {
        Self {
            name: name.into(),
            topology,
            members: Vec::new(),
        }
    }

    pub fn agent(self, agent_id: impl Into<String>) -> Self {
        self.agent_with_deps(agent_id, Vec::<String>::new())
    }

    pub fn agent_with_deps<I, S>(mut self, agent_id: impl Into<String>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members.push(TeamMember {
            agent_id: agent_id.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn build(self, registry: &AgentRegistry) -> Result<Team, TeamError> {
        if self.members.is_empty() {
            return Err(TeamError::EmptyTeam);
        }
        let mut seen = HashSet::new();
        for member in &self.members {
            if !registry.contains(&member.agent_id) {
                return Err(TeamError::UnknownAgent(member.agent_id.clone()));
            }
            if !seen.insert(member.agent_id.as_str()) {
                return Err(TeamError::DuplicateMember(member.agent_id.clone()));
            }
        }
        if self.topology == Topology::MapReduce && self.members.len() < 2 {
            return Err(TeamError::MapReduceTooSmall(self.members.len()));
        }

        let graph = if self.topology == Topology::Parallel {
            let nodes: Vec<(String, Vec<String>)> = self
                .members
                .iter()
                .map(|m| (m.agent_id.clone(), m.depends_on.clone()))
                .collect();
            Some(DependencyGraph::new(&nodes)?)
        } else {
            None
        };

        let mut warnings = Vec::new();
        for member in &self.members {
            if self.topology != Topology::Parallel && !member.depends_on.is_empty() {
                warnings.push(format!(
                    "agent '{}': depends_on is ignored outside the parallel topology",
                    member.agent_id
                ));
            }
            let Some(spec) = registry.get(&member.agent_id) else {
                continue;
            };
            for target in &spec.can_delegate_to {
                if !registry.contains(target) {
                    warnings.push(format!(
                        "agent '{}' may delegate to '{}', which is not registered",
                        spec.id, target
                    ));
                } else if !seen.contains(target.as_str()) {
                    warnings.push(format!(
                        "agent '{}' may delegate to '{}', which is not in team '{}'",
                        spec.id, target, self.name
                    ));
                }
            }
        }
        for warning in &warnings {
            tracing::warn!(team = %self.name, "{}", warning);
        }

        Ok(Team {
            name: self.name,
            topology: self.topology,
            members: self.members,
            graph,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSpec, OutputSchema};

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for (id, targets) in [("lead", vec!["coder", "ghost"]), ("coder", vec![]), ("tester", vec!["lead"])] {
            registry
                .register(
                    AgentSpec::builder(id, id)
                        .can_delegate_to(targets)
                        .output_schema(OutputSchema::text("text"))
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_validation_errors() {
        let reg = registry();
        assert_eq!(
            TeamBuilder::new("t", Topology::Sequential).build(&reg).unwrap_err(),
            TeamError::EmptyTeam
        );
        assert_eq!(
            TeamBuilder::new("t", Topology::Sequential)
                .agent("lead")
                .agent("lead")
                .build(&reg)
                .unwrap_err(),
            TeamError::DuplicateMember("lead".into())
        );
        assert_eq!(
            TeamBuilder::new("t", Topology::Dynamic).agent("nobody").build(&reg).unwrap_err(),
            TeamError::UnknownAgent("nobody".into())
        );
        assert_eq!(
            TeamBuilder::new("t", Topology::MapReduce).agent("coder").build(&reg).unwrap_err(),
            TeamError::MapReduceTooSmall(1)
        );
        assert!(matches!(
            TeamBuilder::new("t", Topology::Parallel)
                .agent_with_deps("coder", ["tester"])
                .agent_with_deps("tester", ["coder"])
                .build(&reg),
            Err(TeamError::DependencyCycle(_))
        ));
        assert!(matches!(
            TeamBuilder::new("t", Topology::Parallel)
                .agent_with_deps("coder", ["lead"])
                .build(&reg),
            Err(TeamError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_out_of_roster_delegation_is_warning() {
        let team = TeamBuilder::new("t", Topology::Dynamic)
            .agent("lead")
            .agent("coder")
            .build(&registry())
            .unwrap();
        assert_eq!(team.warnings.len(), 1);
        assert!(team.warnings[0].contains("ghost"));
        assert_eq!(team.allowed_delegates("lead"), vec!["coder"]);
        assert_eq!(team.allowed_delegates("coder"), vec!["lead"]);
    }

    #[test]
    fn test_hierarchical_only_manager_delegates() {
        let team = TeamBuilder::new("t", Topology::Hierarchical)
            .agent("lead")
            .agent("coder")
            .agent("tester")
            .build(&registry())
            .unwrap();
        assert_eq!(team.entry(), "lead");
        assert_eq!(team.allowed_delegates("lead"), vec!["coder", "tester"]);
        assert!(team.allowed_delegates("tester").is_empty());
        // tester -> lead 在团队内，ghost 未注册
        assert_eq!(team.warnings.len(), 1);
    }
}
