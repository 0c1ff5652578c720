//! 固定上下文：决策、约束、产物引用、待办
//!
//! 每轮原样拼入 system prompt；压缩只作用于对话层，这里的内容永远逐字保留。

use serde::{Deserialize, Serialize};

/// 待办状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Open,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub status: TodoStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedContext {
    pub decisions: Vec<String>,
    pub constraints: Vec<String>,
    pub artifacts: Vec<String>,
    pub todos: Vec<TodoItem>,
}

impl PinnedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_decision(&mut self, decision: impl Into<String>) {
        self.decisions.push(decision.into());
    }

    pub fn add_constraint(&mut self, constraint: impl Into<String>) {
        self.constraints.push(constraint.into());
    }

    /// 同一引用只记一次
    pub fn add_artifact(&mut self, artifact_ref: impl Into<String>) {
        let r = artifact_ref.into();
        if !self.artifacts.contains(&r) {
            self.artifacts.push(r);
        }
    }

    pub fn add_todo(&mut self, text: impl Into<String>) {
        self.todos.push(TodoItem {
            text: text.into(),
            status: TodoStatus::Open,
        });
    }

    /// 按文本标记待办完成；返回是否找到
    pub fn complete_todo(&mut self, text: &str) -> bool {
        match self.todos.iter_mut().find(|t| t.text == text) {
            Some(item) => {
                item.status = TodoStatus::Done;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
            && self.constraints.is_empty()
            && self.artifacts.is_empty()
            && self.todos.is_empty()
    }

    /// 构建 system prompt 片段（Decisions / Constraints / Artifacts / Todos）
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        push_list(&mut s, "Decisions", &self.decisions);
        push_list(&mut s, "Constraints", &self.constraints);
        push_list(&mut s, "Artifacts", &self.artifacts);
        if !self.todos.is_empty() {
            s.push_str("## Todos\n");
            for t in &self.todos {
                let mark = match t.status {
                    TodoStatus::Open => " ",
                    TodoStatus::Done => "x",
                };
                s.push_str(&format!("- [{}] {}\n", mark, t.text));
            }
            s.push('\n');
        }
        s
    }
}

fn push_list(s: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    s.push_str(&format!("## {}\n", title));
    for item in items {
        s.push_str(&format!("- {}\n", item));
    }
    s.push('\n');
}
