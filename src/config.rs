//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RATE_LIMIT__ENABLED=false`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub rate_limit: RateLimitSection,
    pub context: ContextSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub react: ReactSection,
}

/// [app] 段：应用名、团队内委派跳数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单次团队运行内最多委派次数，防止 A -> B -> A 互相踢皮球
    #[serde(default = "default_max_delegations")]
    pub max_delegations: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_delegations: default_max_delegations(),
        }
    }
}

fn default_max_delegations() -> usize {
    16
}

/// 单个 provider 的限流参数
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ProviderLimit {
    /// 每分钟请求数（令牌桶容量）
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// 最大并发请求数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ProviderLimit {
    fn default() -> Self {
        Self {
            rpm: default_rpm(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_rpm() -> u32 {
    60
}

fn default_max_concurrent() -> usize {
    10
}

/// [rate_limit] 段：全局开关、默认限额与按 provider 覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default: ProviderLimit,
    /// provider 名 -> 限额；key 不区分大小写
    #[serde(default)]
    pub providers: HashMap<String, ProviderLimit>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            default: ProviderLimit::default(),
            providers: HashMap::new(),
        }
    }
}

impl RateLimitSection {
    /// 取某 provider 的限额，未配置时回落到 default
    pub fn limit_for(&self, provider: &str) -> ProviderLimit {
        let key = provider.to_lowercase();
        self.providers
            .iter()
            .find(|(k, _)| k.to_lowercase() == key)
            .map(|(_, v)| *v)
            .unwrap_or(self.default)
    }
}

fn default_true() -> bool {
    true
}

/// [context] 段：上下文窗口预算与压缩参数
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_model_context_tokens")]
    pub model_context_tokens: usize,
    #[serde(default = "default_reserved_output_tokens")]
    pub reserved_output_tokens: usize,
    #[serde(default = "default_safety_margin_tokens")]
    pub safety_margin_tokens: usize,
    #[serde(default = "default_soft_limit_ratio")]
    pub soft_limit_ratio: f64,
    #[serde(default = "default_hard_limit_ratio")]
    pub hard_limit_ratio: f64,
    /// 压缩时保留的最近消息条数
    #[serde(default = "default_compaction_min_keep")]
    pub compaction_min_keep: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            model_context_tokens: default_model_context_tokens(),
            reserved_output_tokens: default_reserved_output_tokens(),
            safety_margin_tokens: default_safety_margin_tokens(),
            soft_limit_ratio: default_soft_limit_ratio(),
            hard_limit_ratio: default_hard_limit_ratio(),
            compaction_min_keep: default_compaction_min_keep(),
        }
    }
}

fn default_model_context_tokens() -> usize {
    32768
}

fn default_reserved_output_tokens() -> usize {
    2048
}

fn default_safety_margin_tokens() -> usize {
    256
}

fn default_soft_limit_ratio() -> f64 {
    0.85
}

fn default_hard_limit_ratio() -> f64 {
    0.95
}

fn default_compaction_min_keep() -> usize {
    4
}

/// [agent] 段：Agent 默认步数与工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub default_max_steps: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            default_max_steps: default_max_steps(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_max_steps() -> usize {
    10
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [llm] 段：传输层的重试与熔断
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
}

/// [llm.retry] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: true,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_exponential_base() -> f64 {
    2.0
}

/// [llm.circuit_breaker] 段：连续失败阈值与恢复时间
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_seconds")]
    pub recovery_seconds: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_seconds: default_recovery_seconds(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_seconds() -> u64 {
    60
}

/// [react] 段：规划-执行-反思循环的重试上限
#[derive(Debug, Clone, Deserialize)]
pub struct ReactSection {
    /// 重新规划次数上限（Plan.max_retries）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_replan_depth")]
    pub max_replan_depth: u32,
    /// system_error 快速重试次数（不经过 Reflector）
    #[serde(default = "default_max_retries")]
    pub system_fast_retries: u32,
}

impl Default for ReactSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_replan_depth: default_max_replan_depth(),
            system_fast_retries: default_max_retries(),
        }
    }
}

fn default_max_replan_depth() -> u32 {
    5
}

impl AppConfig {
    /// 直接从 TOML 文本解析（测试与内嵌配置用）
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
