//! 带指数退避的重试包装
//!
//! 只重试瞬时错误（传输、超时、供应商限流）；熔断打开、响应非法等立即返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::RetrySection;
use crate::llm::{InvokeOptions, LlmClient, LlmError, ModelResponse};
use crate::memory::Message;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_config(&RetrySection::default())
    }
}

impl RetryConfig {
    pub fn from_config(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            exponential_base: section.exponential_base,
            jitter: section.jitter,
        }
    }

    /// 第 attempt 次重试（从 0 开始）前的等待：initial * base^attempt，封顶 max_delay；
    /// 开启 jitter 时在 [0.5, 1.0] 倍之间随机
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

/// 重试包装客户端
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn invoke(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ModelResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.invoke(messages, options).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(
                        provider = %self.inner.provider(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "llm call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
