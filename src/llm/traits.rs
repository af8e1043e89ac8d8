//! AI Provider 抽象
//!
//! 具体厂商的 HTTP 请求构造由外部实现；核心只依赖 `call(prompt, config, cancel) -> 原始文本`。

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;

/// 发往 Provider 的提示词：system 指令 + 用户原文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Provider 错误：凭据问题不可重试，其余可重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("missing API key for provider {0}")]
    MissingCredentials(String),

    #[error("invalid API key: {0}")]
    InvalidCredentials(String),

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider request timed out")]
    Timeout,

    #[error("provider request failed: {0}")]
    RequestFailed(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::MissingCredentials(_) | ProviderError::InvalidCredentials(_)
        )
    }
}

/// AI Provider trait：一次非流式调用，返回模型原始回复文本
///
/// 实现应在 `cancel` 触发后尽快返回；协调器同时会在外层丢弃 future。
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(
        &self,
        prompt: &Prompt,
        config: &ProviderConfig,
        cancel: CancellationToken,
    ) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}
