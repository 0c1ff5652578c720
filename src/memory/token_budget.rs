//! 上下文预算
//!
//! 粗粒度估算消息 token 数，并与模型上下文窗口的 soft / hard 阈值比较。
//! 估算只用于「是否触发压缩」，宁可高估不可低估。

use serde::Serialize;

use crate::config::ContextSection;
use crate::core::ConfigError;
use crate::memory::Message;

/// 每条消息的角色/格式化开销
pub const MESSAGE_OVERHEAD_TOKENS: usize = 6;

/// Token 估算器（启发式）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本 token 数：按 ASCII 占比选择除数（4 / 3 / 2），向上取整；空文本为 0
    pub fn estimate(text: &str) -> usize {
        let t = text.trim();
        if t.is_empty() {
            return 0;
        }
        let total = t.chars().count();
        let ascii = t.chars().filter(|c| c.is_ascii()).count();
        let ratio = ascii as f64 / total as f64;
        let divisor = if ratio >= 0.95 {
            4
        } else if ratio >= 0.6 {
            3
        } else {
            2
        };
        total.div_ceil(divisor)
    }

    /// 估算一组消息：内容（含工具调用参数）+ 每条固定开销
    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| {
                let mut tokens = Self::estimate(&m.content) + MESSAGE_OVERHEAD_TOKENS;
                for call in &m.tool_calls {
                    tokens += Self::estimate(&call.name) + Self::estimate(&call.args.to_string());
                }
                tokens
            })
            .sum()
    }
}

/// 上下文预算（token 级），构造时校验 hard >= soft
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextBudget {
    model_context_tokens: usize,
    reserved_output_tokens: usize,
    safety_margin_tokens: usize,
    soft_limit_ratio: f64,
    hard_limit_ratio: f64,
}

impl ContextBudget {
    pub fn new(
        model_context_tokens: usize,
        reserved_output_tokens: usize,
        safety_margin_tokens: usize,
        soft_limit_ratio: f64,
        hard_limit_ratio: f64,
    ) -> Result<Self, ConfigError> {
        if model_context_tokens == 0 {
            return Err(ConfigError::InvalidBudget(
                "model_context_tokens must be > 0".to_string(),
            ));
        }
        for (name, r) in [("soft_limit_ratio", soft_limit_ratio), ("hard_limit_ratio", hard_limit_ratio)] {
            if !(r > 0.0 && r <= 1.0) {
                return Err(ConfigError::InvalidBudget(format!(
                    "{} {} must be in (0, 1]",
                    name, r
                )));
            }
        }
        if hard_limit_ratio < soft_limit_ratio {
            return Err(ConfigError::InvalidBudgetRatios {
                soft: soft_limit_ratio,
                hard: hard_limit_ratio,
            });
        }
        Ok(Self {
            model_context_tokens,
            reserved_output_tokens,
            safety_margin_tokens,
            soft_limit_ratio,
            hard_limit_ratio,
        })
    }

    pub fn from_config(section: &ContextSection) -> Result<Self, ConfigError> {
        Self::new(
            section.model_context_tokens,
            section.reserved_output_tokens,
            section.safety_margin_tokens,
            section.soft_limit_ratio,
            section.hard_limit_ratio,
        )
    }

    pub fn model_context_tokens(&self) -> usize {
        self.model_context_tokens
    }

    pub fn soft_limit_tokens(&self) -> usize {
        (self.model_context_tokens as f64 * self.soft_limit_ratio).floor() as usize
    }

    pub fn hard_limit_tokens(&self) -> usize {
        (self.model_context_tokens as f64 * self.hard_limit_ratio).floor() as usize
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            model_context_tokens: 32768,
            reserved_output_tokens: 2048,
            safety_margin_tokens: 256,
            soft_limit_ratio: 0.85,
            hard_limit_ratio: 0.95,
        }
    }
}

/// 预算使用快照：每次检查时从当前消息重新计算，不跨轮缓存
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetUsage {
    pub estimated_input_tokens: usize,
    pub estimated_total_tokens: usize,
    pub soft_limit_tokens: usize,
    pub hard_limit_tokens: usize,
    /// 可能为负（已超窗口）
    pub remaining_tokens: i64,
    pub utilization_ratio: f64,
}

impl BudgetUsage {
    pub fn over_soft(&self) -> bool {
        self.estimated_total_tokens >= self.soft_limit_tokens
    }

    pub fn over_hard(&self) -> bool {
        self.estimated_total_tokens >= self.hard_limit_tokens
    }
}

/// 在已知输入 token 数的情况下计算快照
pub fn usage_for_input(estimated_input_tokens: usize, budget: &ContextBudget) -> BudgetUsage {
    let total = estimated_input_tokens + budget.reserved_output_tokens + budget.safety_margin_tokens;
    BudgetUsage {
        estimated_input_tokens,
        estimated_total_tokens: total,
        soft_limit_tokens: budget.soft_limit_tokens(),
        hard_limit_tokens: budget.hard_limit_tokens(),
        remaining_tokens: budget.model_context_tokens as i64 - total as i64,
        utilization_ratio: total as f64 / budget.model_context_tokens as f64,
    }
}

pub fn compute_budget_usage(messages: &[Message], budget: &ContextBudget) -> BudgetUsage {
    usage_for_input(TokenEstimator::estimate_messages(messages), budget)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator_density() {
        assert_eq!(TokenEstimator::estimate(""), 0);
        assert_eq!(TokenEstimator::estimate("   "), 0);
        // 纯英文 4 字符 / token
        assert_eq!(TokenEstimator::estimate("abcdefgh"), 2);
        assert_eq!(TokenEstimator::estimate("abcdefghi"), 3);
        // 纯中文 2 字符 / token
        assert_eq!(TokenEstimator::estimate("你好世界"), 2);
        // 混合：7 ascii + 3 中文，占比 0.7 -> 3 字符 / token
        assert_eq!(TokenEstimator::estimate("abcdefg你好吗"), 4);
    }

    #[test]
    fn test_message_overhead() {
        let msgs = vec![Message::user("abcd"), Message::assistant("")];
        assert_eq!(TokenEstimator::estimate_messages(&msgs), 1 + 6 + 6);
    }

    #[test]
    fn test_hard_below_soft_rejected() {
        let err = ContextBudget::new(1000, 100, 50, 0.9, 0.8).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBudgetRatios { .. }));
        assert!(ContextBudget::new(1000, 100, 50, 0.8, 0.8).is_ok());
        assert!(ContextBudget::new(0, 0, 0, 0.5, 0.9).is_err());
    }

    #[test]
    fn test_usage_between_soft_and_hard() {
        let budget = ContextBudget::new(1000, 100, 50, 0.8, 0.95).unwrap();
        let usage = usage_for_input(700, &budget);
        assert_eq!(usage.estimated_total_tokens, 850);
        assert_eq!(usage.soft_limit_tokens, 800);
        assert_eq!(usage.hard_limit_tokens, 950);
        assert_eq!(usage.remaining_tokens, 150);
        assert!(usage.over_soft());
        assert!(!usage.over_hard());
        assert!((usage.utilization_ratio - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_remaining_goes_negative_past_window() {
        let budget = ContextBudget::new(1000, 100, 50, 0.8, 0.95).unwrap();
        let usage = usage_for_input(1000, &budget);
        assert_eq!(usage.estimated_total_tokens, 1150);
        assert_eq!(usage.remaining_tokens, -150);
        assert!(usage.over_hard());
    }

    #[test]
    fn test_defaults_match_config() {
        let from_cfg = ContextBudget::from_config(&ContextSection::default()).unwrap();
        assert_eq!(from_cfg, ContextBudget::default());
    }
}
