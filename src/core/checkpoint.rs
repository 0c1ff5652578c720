//! 运行状态存档
//!
//! 调度器每一跳之后通过 Checkpointer 保存 RunState（按 session id）；格式由实现决定。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::team::RunState;

#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, session_id: &str, state: &RunState) -> anyhow::Result<()>;

    async fn load(&self, session_id: &str) -> anyhow::Result<Option<RunState>>;
}

/// 进程内存档（测试与单进程部署）
#[derive(Default)]
pub struct InMemoryCheckpointer {
    states: RwLock<HashMap<String, RunState>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, session_id: &str, state: &RunState) -> anyhow::Result<()> {
        self.states
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> anyhow::Result<Option<RunState>> {
        Ok(self.states.read().await.get(session_id).cloned())
    }
}

/// JSON 文件存档：每个 session 一个 `<dir>/<session_id>.json`，先写临时文件再 rename
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointer {
    dir: PathBuf,
}

impl JsonFileCheckpointer {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl Checkpointer for JsonFileCheckpointer {
    async fn save(&self, session_id: &str, state: &RunState) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(session_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> anyhow::Result<Option<RunState>> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;
    use crate::team::AgentStatus;

    fn sample() -> RunState {
        let mut state = RunState::new("sess-1");
        state.session.push(Message::user("hello"));
        state.set_status("analyst", AgentStatus::Completed);
        state
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryCheckpointer::new();
        assert!(store.load("sess-1").await.unwrap().is_none());
        store.save("sess-1", &sample()).await.unwrap();
        let loaded = store.load("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded.status("analyst"), AgentStatus::Completed);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointer::new(dir.path().join("runs"));
        assert!(store.load("sess-1").await.unwrap().is_none());
        store.save("sess-1", &sample()).await.unwrap();
        let loaded = store.load("sess-1").await.unwrap().unwrap();
        assert_eq!(loaded.session.conversation.len(), 1);
        assert!(dir.path().join("runs").join("sess-1.json").exists());
    }
}
