//! 事件总线：按事件名订阅，emit 时并发执行所有处理器
//!
//! 处理器出错或 panic 只记日志，不会传回发布方。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;

use crate::events::{EventEnvelope, HiveEvent};

/// 订阅全部事件
pub const WILDCARD: &str = "*";

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

pub type EventHandler =
    Arc<dyn Fn(Arc<EventEnvelope>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    handler_timeout: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// 单个处理器的超时；超时后放弃等待并记日志
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// 订阅异步处理器；event_type 为 "*" 时接收全部事件
    pub fn on<F, Fut>(&self, event_type: &str, handler: F)
    where
        F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |ev| handler(ev).boxed());
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        map.entry(event_type.to_string()).or_default().push(handler);
    }

    /// 订阅同步处理器；在阻塞线程池上执行，超时照常生效
    pub fn on_sync<F>(&self, event_type: &str, handler: F)
    where
        F: Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.on(event_type, move |ev| {
            let handler = Arc::clone(&handler);
            async move {
                tokio::task::spawn_blocking(move || handler(ev.as_ref()))
                    .await
                    .map_err(|e| anyhow::anyhow!("sync handler aborted: {}", e))?
            }
        });
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        map.get(event_type).map(|v| v.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    /// 发布事件并等待所有处理器结束（或超时）
    pub async fn emit(&self, event: HiveEvent) {
        let envelope = Arc::new(EventEnvelope::new(event));
        let event_type = envelope.event.event_type();

        let targets: Vec<EventHandler> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            map.get(event_type)
                .into_iter()
                .chain(map.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let timeout = self.handler_timeout;
        let tasks = targets.into_iter().map(|handler| {
            let ev = Arc::clone(&envelope);
            tokio::spawn(async move { tokio::time::timeout(timeout, handler(ev)).await })
        });

        for outcome in join_all(tasks).await {
            match outcome {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    tracing::warn!(event_type, error = %e, "event handler failed");
                }
                Ok(Err(_)) => {
                    tracing::warn!(event_type, timeout_ms = timeout.as_millis() as u64, "event handler timed out");
                }
                Err(join_err) => {
                    tracing::error!(event_type, error = %join_err, "event handler panicked");
                }
            }
        }
    }
}
