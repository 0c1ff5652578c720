//! 依赖图
//!
//! 邻接表 + 入度表（Kahn 拓扑排序）做环检测；就绪集合按声明顺序返回。

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::core::TeamError;
use crate::team::AgentStatus;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// 声明顺序
    order: Vec<String>,
    depends_on: HashMap<String, Vec<String>>,
    /// 节点 -> 依赖它的节点
    adjacency: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// 构建并校验：依赖必须在图内，且不能成环
    pub fn new(nodes: &[(String, Vec<String>)]) -> Result<Self, TeamError> {
        let order: Vec<String> = nodes.iter().map(|(id, _)| id.clone()).collect();
        let mut depends_on: HashMap<String, Vec<String>> = HashMap::new();
        let mut adjacency: HashMap<String, Vec<String>> =
            order.iter().map(|id| (id.clone(), Vec::new())).collect();

        for (id, deps) in nodes {
            for dep in deps {
                let dependents = adjacency.get_mut(dep).ok_or_else(|| TeamError::UnknownDependency {
                    agent: id.clone(),
                    dependency: dep.clone(),
                })?;
                dependents.push(id.clone());
            }
            depends_on.insert(id.clone(), deps.clone());
        }

        let graph = Self {
            order,
            depends_on,
            adjacency,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), TeamError> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies(id).len()))
            .collect();
        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .map(String::as_str)
            .collect();

        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in self.adjacency.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if visited == self.order.len() {
            return Ok(());
        }
        let cycle: Vec<String> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id.as_str()).copied().unwrap_or(0) > 0)
            .cloned()
            .collect();
        Err(TeamError::DependencyCycle(cycle))
    }

    pub fn nodes(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.depends_on.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 可启动的节点：自身 Pending 且全部依赖 Completed
    pub fn ready(&self, statuses: &BTreeMap<String, AgentStatus>) -> Vec<String> {
        let status = |id: &str| statuses.get(id).copied().unwrap_or(AgentStatus::Pending);
        self.order
            .iter()
            .filter(|id| status(id.as_str()) == AgentStatus::Pending)
            .filter(|id| {
                self.dependencies(id)
                    .iter()
                    .all(|dep| status(dep.as_str()) == AgentStatus::Completed)
            })
            .cloned()
            .collect()
    }

    /// 依赖中有 Failed / Skipped 的 Pending 节点（它们永远不会就绪）
    pub fn blocked(&self, statuses: &BTreeMap<String, AgentStatus>) -> Vec<String> {
        let status = |id: &str| statuses.get(id).copied().unwrap_or(AgentStatus::Pending);
        self.order
            .iter()
            .filter(|id| status(id.as_str()) == AgentStatus::Pending)
            .filter(|id| {
                self.dependencies(id)
                    .iter()
                    .any(|dep| matches!(status(dep.as_str()), AgentStatus::Failed | AgentStatus::Skipped))
            })
            .cloned()
            .collect()
    }
}
