//! LLM 层：客户端抽象、Mock 实现，以及限流 / 重试 / 熔断包装

pub mod circuit_breaker;
pub mod mock;
pub mod rate_limiter;
pub mod retry;
pub mod traits;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerLlm, CircuitState};
pub use mock::{MockLlmClient, RecordedCall, ScriptedLlmClient};
pub use rate_limiter::{RateLimitPermit, RateLimitStats, RateLimitedLlm, RateLimiter, TokenBucket};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{
    BoundLlm, InvokeOptions, LlmClient, LlmClientExt, LlmError, ModelResponse, ToolCall, ToolSpec,
};

use std::sync::Arc;

use crate::config::LlmSection;

/// 按固定顺序叠加包装：限流（最外层）-> 熔断 -> 重试 -> 传输
///
/// 重试不额外消耗令牌；一次整体失败只计一次熔断失败。
pub fn wrap_transport(
    transport: Arc<dyn LlmClient>,
    section: &LlmSection,
    limiter: Arc<RateLimiter>,
) -> Arc<dyn LlmClient> {
    let retrying: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(
        transport,
        RetryConfig::from_config(&section.retry),
    ));
    let guarded: Arc<dyn LlmClient> = Arc::new(CircuitBreakerLlm::new(
        retrying,
        Arc::new(CircuitBreaker::from_config(&section.circuit_breaker)),
    ));
    Arc::new(RateLimitedLlm::new(guarded, limiter))
}
