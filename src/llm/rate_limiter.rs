//! 按 provider 的准入控制：令牌桶（请求速率）+ 信号量（并发数）
//!
//! 每次出站模型调用先 acquire 一个 RateLimitPermit；permit drop 时归还并发槽位（成功、出错、取消都一样）。
//! 不同 provider 互相隔离；provider key 统一转小写；状态在首次使用时惰性创建。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::{ProviderLimit, RateLimitSection};
use crate::llm::{InvokeOptions, LlmClient, LlmError, ModelResponse};
use crate::memory::Message;

/// 令牌桶：以 rpm/60 个/秒连续补充，上限 rpm，初始为满
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rpm: u32, now: Instant) -> Self {
        let capacity = rpm.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: now,
        }
    }

    /// 按流逝时间补充；时间倒退时不变
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// 尝试取一个令牌；不足时返回需要等待的时长（缺口 / 速率）
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// 归还一个未使用的令牌（不超过上限）
    pub fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

struct ProviderState {
    limit: ProviderLimit,
    bucket: StdMutex<TokenBucket>,
    semaphore: Arc<Semaphore>,
    total_requests: AtomicU64,
}

impl ProviderState {
    fn new(limit: ProviderLimit) -> Self {
        let max_concurrent = limit.max_concurrent.max(1);
        Self {
            limit,
            bucket: StdMutex::new(TokenBucket::new(limit.rpm, Instant::now())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            total_requests: AtomicU64::new(0),
        }
    }

    fn bucket(&self) -> std::sync::MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> usize {
        self.limit
            .max_concurrent
            .max(1)
            .saturating_sub(self.semaphore.available_permits())
    }
}

/// 已取令牌、尚未拿到并发槽位；drop 时若仍 armed 则退还令牌
struct TokenRefund {
    state: Arc<ProviderState>,
    armed: bool,
}

impl TokenRefund {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TokenRefund {
    fn drop(&mut self) {
        if self.armed {
            self.state.bucket().refund();
        }
    }
}

/// 单个 provider 的统计（仅供观测）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub provider: String,
    pub rpm: u32,
    pub max_concurrent: usize,
    pub total_requests: u64,
    pub in_flight: usize,
    pub tokens: f64,
}

/// 作用域许可：drop 即释放并发槽位
#[derive(Debug)]
pub struct RateLimitPermit {
    provider: String,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RateLimitPermit {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// 限流关闭时的空许可
    pub fn is_noop(&self) -> bool {
        self._permit.is_none()
    }
}

/// 按 provider 的限流器；由应用持有并注入，不是全局单例
pub struct RateLimiter {
    config: RateLimitSection,
    providers: Mutex<HashMap<String, Arc<ProviderState>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitSection) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// 关闭限流：acquire 立即返回空许可
    pub fn disabled() -> Self {
        Self::new(RateLimitSection {
            enabled: false,
            ..RateLimitSection::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn state_for(&self, key: &str) -> Arc<ProviderState> {
        let mut providers = self.providers.lock().await;
        Arc::clone(
            providers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(ProviderState::new(self.config.limit_for(key)))),
        )
    }

    /// 获取许可：先等令牌，再等并发槽位；等槽位时被取消会退还令牌
    pub async fn acquire(&self, provider: &str) -> Result<RateLimitPermit, LlmError> {
        let key = provider.to_lowercase();
        if !self.config.enabled {
            return Ok(RateLimitPermit {
                provider: key,
                _permit: None,
            });
        }

        let state = self.state_for(&key).await;

        loop {
            let wait = state.bucket().try_take(Instant::now()).err();
            match wait {
                None => break,
                Some(wait) => {
                    tracing::debug!(provider = %key, wait_ms = wait.as_millis() as u64, "rate limit: waiting for token");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        // 排队等槽位期间被取消时令牌退回桶里
        let refund = TokenRefund {
            state: Arc::clone(&state),
            armed: true,
        };
        let permit = Arc::clone(&state.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LlmError::RateLimited(format!("limiter for '{}' closed", key)))?;
        refund.disarm();
        state.total_requests.fetch_add(1, Ordering::Relaxed);

        Ok(RateLimitPermit {
            provider: key,
            _permit: Some(permit),
        })
    }

    pub async fn stats(&self, provider: &str) -> Option<RateLimitStats> {
        let key = provider.to_lowercase();
        let state = self.providers.lock().await.get(&key).cloned()?;
        let tokens = {
            let mut bucket = state.bucket();
            bucket.refill(Instant::now());
            bucket.tokens()
        };
        Some(RateLimitStats {
            provider: key,
            rpm: state.limit.rpm,
            max_concurrent: state.limit.max_concurrent.max(1),
            total_requests: state.total_requests.load(Ordering::Relaxed),
            in_flight: state.in_flight(),
            tokens,
        })
    }

    /// 清空所有 provider 状态（测试 / 管理操作）
    pub async fn reset(&self) {
        self.providers.lock().await.clear();
    }
}

/// 在每次 invoke 前获取限流许可的包装客户端
pub struct RateLimitedLlm {
    inner: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedLlm {
    pub fn new(inner: Arc<dyn LlmClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl LlmClient for RateLimitedLlm {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn invoke(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ModelResponse, LlmError> {
        let _permit = self.limiter.acquire(self.inner.provider()).await?;
        self.inner.invoke(messages, options).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn limiter(rpm: u32, max_concurrent: usize) -> RateLimiter {
        RateLimiter::new(RateLimitSection {
            enabled: true,
            default: ProviderLimit { rpm, max_concurrent },
            providers: HashMap::new(),
        })
    }

    #[test]
    fn test_bucket_refill_is_linear_and_capped() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(60, t0);
        for _ in 0..60 {
            assert!(bucket.try_take(t0).is_ok());
        }
        let wait = bucket.try_take(t0).unwrap_err();
        assert_eq!(wait, Duration::from_secs(1));

        bucket.refill(t0 + Duration::from_millis(2500));
        assert!((bucket.tokens() - 2.5).abs() < 1e-9);

        bucket.refill(t0 + Duration::from_secs(600));
        assert!((bucket.tokens() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_wait_is_deficit_over_rate() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(120, t0);
        for _ in 0..120 {
            bucket.try_take(t0).unwrap();
        }
        bucket.refill(t0 + Duration::from_millis(250));
        // 0.5 个令牌，缺口 0.5，速率 2/s -> 250ms
        let wait = bucket.try_take(t0 + Duration::from_millis(250)).unwrap_err();
        assert_eq!(wait, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let limiter = RateLimiter::disabled();
        let permit = limiter.acquire("OpenAI").await.unwrap();
        assert!(permit.is_noop());
        assert!(limiter.stats("openai").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_wait_sleeps_exactly() {
        let limiter = limiter(60, 10);
        let start = Instant::now();
        for _ in 0..61 {
            drop(limiter.acquire("p").await.unwrap());
        }
        // 第 61 个请求需要等 1 秒补充一个令牌
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1100));
        assert_eq!(limiter.stats("p").await.unwrap().total_requests, 61);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_for_slot_refunds_token() {
        let limiter = limiter(2, 1);
        let held = limiter.acquire("p").await.unwrap();

        let queued = tokio::time::timeout(Duration::from_millis(10), limiter.acquire("p")).await;
        assert!(queued.is_err());
        // 第二个令牌已退还，只有 held 消耗了令牌
        let stats = limiter.stats("p").await.unwrap();
        assert!(stats.tokens >= 1.0, "token lost: {}", stats.tokens);
        assert_eq!(stats.total_requests, 1);

        drop(held);
        let start = Instant::now();
        drop(limiter.acquire("p").await.unwrap());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let limiter = limiter(600, 2);
        let a = limiter.acquire("p").await.unwrap();
        let _b = limiter.acquire("p").await.unwrap();
        assert_eq!(limiter.stats("p").await.unwrap().in_flight, 2);
        drop(a);
        assert_eq!(limiter.stats("p").await.unwrap().in_flight, 1);
    }

    #[tokio::test]
    async fn test_providers_are_isolated() {
        let limiter = Arc::new(limiter(600, 1));
        let _held = limiter.acquire("a").await.unwrap();
        let other = tokio::time::timeout(Duration::from_millis(100), limiter.acquire("B")).await;
        assert!(other.is_ok(), "provider b must not wait on provider a");
        let same = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("A")).await;
        assert!(same.is_err(), "provider a is at capacity");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_max() {
        let limiter = Arc::new(limiter(60, 5));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("p").await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(limiter.stats("p").await.unwrap().total_requests, 20);
        assert_eq!(limiter.stats("p").await.unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let limiter = limiter(60, 1);
        drop(limiter.acquire("p").await.unwrap());
        limiter.reset().await;
        assert!(limiter.stats("p").await.is_none());
    }
}
