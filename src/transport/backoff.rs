//! 重连策略：指数退避
//!
//! `delay = min(initial * multiplier^(attempt-1), max)`，attempt 从 1 开始。

use std::time::Duration;

/// 重连策略，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// 第 attempt 次重连前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// 完整的退避序列（用于日志与测试）
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries).map(|a| self.delay_for(a)).collect()
    }
}
