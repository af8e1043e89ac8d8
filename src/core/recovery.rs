//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供上层决定是请用户改写、重试、重连还是终止。

use crate::core::{AgentError, RecoveryAction};
use crate::llm::ProviderError;

/// 语义化错误恢复：将错误映射为可执行动作（改写 / 重试 / 重连 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        if !err.is_retryable() {
            return RecoveryAction::Abort;
        }
        match err {
            AgentError::EmptyInput => {
                RecoveryAction::Rephrase("请输入要执行的飞行指令。".to_string())
            }
            AgentError::InputTooLong { max, .. } => RecoveryAction::Rephrase(format!(
                "指令过长，请精简到 {max} 个字符以内。"
            )),
            AgentError::Parse(_) => RecoveryAction::Rephrase(
                "未能从模型回复中解析出指令序列，请换一种说法重试。".to_string(),
            ),
            AgentError::Validation(e) => {
                RecoveryAction::Rephrase(format!("指令未通过安全校验: {e}。请调整后重试。"))
            }
            AgentError::Provider(ProviderError::RateLimited { .. })
            | AgentError::Provider(ProviderError::Timeout)
            | AgentError::Provider(ProviderError::RequestFailed(_))
            | AgentError::Cancelled { .. } => RecoveryAction::Retry,
            AgentError::Transport(_) => RecoveryAction::Reconnect,
            _ => RecoveryAction::Abort,
        }
    }
}
