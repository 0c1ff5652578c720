//! 熔断器：Closed / Open / HalfOpen 状态机，保护模型传输层
//!
//! - Closed：正常放行；连续失败达到 failure_threshold 时转 Open
//! - Open：直接拒绝；经过 recovery_timeout 后转 HalfOpen
//! - HalfOpen：只放行一个探测请求；成功 -> Closed，失败 -> Open

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerSection;
use crate::llm::{InvokeOptions, LlmClient, LlmError, ModelResponse};
use crate::memory::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn from_config(section: &CircuitBreakerSection) -> Self {
        Self::new(
            section.failure_threshold,
            Duration::from_secs(section.recovery_seconds),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前状态（Open 超时后读出 HalfOpen）
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.advance(&mut inner);
        inner.state
    }

    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened) = inner.opened_at {
                if opened.elapsed() >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    /// 请求放行判断；HalfOpen 下只允许一个探测
    ///
    /// 返回的许可必须以 success / failure 结束；未结束就被 drop（调用被取消）时归还探测名额。
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = self.lock();
        self.advance(&mut inner);
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return None;
                }
                inner.probe_in_flight = true;
                true
            }
        };
        Some(BreakerPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::debug!("half-open probe abandoned, slot released");
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        let trip = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
        }
    }
}

/// 一次放行；探测请求在 drop 前未记录结果时释放探测名额
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

/// 熔断包装客户端
pub struct CircuitBreakerLlm {
    inner: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLlm {
    pub fn new(inner: Arc<dyn LlmClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl LlmClient for CircuitBreakerLlm {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn invoke(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ModelResponse, LlmError> {
        let Some(permit) = self.breaker.try_acquire() else {
            return Err(LlmError::CircuitOpen {
                provider: self.inner.provider().to_string(),
            });
        };
        match self.inner.invoke(messages, options).await {
            Ok(resp) => {
                permit.success();
                Ok(resp)
            }
            Err(e) => {
                permit.failure();
                if self.breaker.state() == CircuitState::Open {
                    tracing::warn!(provider = %self.inner.provider(), error = %e, "circuit opened");
                }
                Err(e)
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[tokio::test(start_paused = true)]
    async fn test_state_machine() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert!(breaker.try_acquire().is_none(), "only one probe in half-open");

        probe.failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(60)).await;
        breaker.try_acquire().unwrap().success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_wrapper_rejects_when_open() {
        let inner = Arc::new(ScriptedLlmClient::new([
            Err(LlmError::Timeout),
            Ok(ModelResponse::text("unreachable")),
        ]));
        let client = CircuitBreakerLlm::new(
            inner.clone(),
            Arc::new(CircuitBreaker::new(1, Duration::from_secs(60))),
        );
        let opts = InvokeOptions::default();
        assert!(matches!(client.invoke(&[], &opts).await, Err(LlmError::Timeout)));
        assert!(matches!(
            client.invoke(&[], &opts).await,
            Err(LlmError::CircuitOpen { .. })
        ));
        assert_eq!(inner.invocation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_call_frees_slot() {
        let inner = Arc::new(
            ScriptedLlmClient::new([
                Err(LlmError::Timeout),
                Ok(ModelResponse::text("late")),
                Ok(ModelResponse::text("recovered")),
            ])
            .with_delay(Duration::from_secs(10)),
        );
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        let client = CircuitBreakerLlm::new(inner.clone(), breaker.clone());
        let opts = InvokeOptions::default();

        assert!(client.invoke(&[], &opts).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(61)).await;

        // 探测请求在返回前被放弃
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), client.invoke(&[], &opts)).await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        tokio::time::advance(Duration::from_secs(3600)).await;
        let result = client.invoke(&[], &opts).await;
        assert!(result.is_ok(), "breaker stayed wedged: {:?}", result);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_closed_permit_drop_keeps_state() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let permit = breaker.try_acquire().unwrap();
        assert!(!permit.is_probe());
        drop(permit);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
