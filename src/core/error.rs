//! Agent 错误类型与恢复动作
//!
//! 每个对外暴露的错误都带机器可读的 kind、可读消息与 retryable 标记；
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Rephrase / Retry / Reconnect / Abort。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{ParseError, ValidationError};
use crate::llm::ProviderError;
use crate::transport::{TransportError, TransportErrorKind};

/// 取消来源：超时、被同 id 新请求顶替、调用方显式取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Timeout,
    Superseded,
    Explicit,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Timeout => write!(f, "timed out"),
            CancelReason::Superseded => write!(f, "superseded"),
            CancelReason::Explicit => write!(f, "cancelled"),
        }
    }
}

/// Agent 运行过程中可能出现的错误（输入、Provider、解析、校验、取消、传输、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Input is empty")]
    EmptyInput,

    #[error("Input too long: {len} characters (max {max})")]
    InputTooLong { len: usize, max: usize },

    #[error("Input contains unsafe instruction: {0}")]
    UnsafeInput(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// 超时与显式取消共用同一路径，仅 reason 不同
    #[error("Request {id} cancelled or timed out ({reason})")]
    Cancelled { id: String, reason: CancelReason },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 机器可读的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyInput,
    InputTooLong,
    UnsafeInput,
    MissingCredentials,
    InvalidCredentials,
    RateLimited,
    ProviderTimeout,
    ProviderRequestFailed,
    ParseFailed,
    EmptyCommandList,
    UnsupportedCommand,
    InvalidDistance,
    InvalidAngle,
    InvalidParameter,
    Cancelled,
    Transport(TransportErrorKind),
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyInput => "EMPTY_INPUT",
            ErrorKind::InputTooLong => "INPUT_TOO_LONG",
            ErrorKind::UnsafeInput => "UNSAFE_INPUT",
            ErrorKind::MissingCredentials => "MISSING_CREDENTIALS",
            ErrorKind::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::ProviderTimeout => "PROVIDER_TIMEOUT",
            ErrorKind::ProviderRequestFailed => "PROVIDER_REQUEST_FAILED",
            ErrorKind::ParseFailed => "PARSE_FAILED",
            ErrorKind::EmptyCommandList => "EMPTY_COMMAND_LIST",
            ErrorKind::UnsupportedCommand => "UNSUPPORTED_COMMAND",
            ErrorKind::InvalidDistance => "INVALID_DISTANCE",
            ErrorKind::InvalidAngle => "INVALID_ANGLE",
            ErrorKind::InvalidParameter => "INVALID_PARAMETER",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Transport(kind) => kind.as_str(),
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::EmptyInput => ErrorKind::EmptyInput,
            AgentError::InputTooLong { .. } => ErrorKind::InputTooLong,
            AgentError::UnsafeInput(_) => ErrorKind::UnsafeInput,
            AgentError::Provider(e) => match e {
                ProviderError::MissingCredentials(_) => ErrorKind::MissingCredentials,
                ProviderError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
                ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
                ProviderError::Timeout => ErrorKind::ProviderTimeout,
                ProviderError::RequestFailed(_) => ErrorKind::ProviderRequestFailed,
            },
            AgentError::Parse(_) => ErrorKind::ParseFailed,
            AgentError::Validation(e) => match e {
                ValidationError::EmptyCommandList => ErrorKind::EmptyCommandList,
                ValidationError::UnsupportedCommand { .. } => ErrorKind::UnsupportedCommand,
                ValidationError::InvalidDistance { .. } => ErrorKind::InvalidDistance,
                ValidationError::InvalidAngle { .. } => ErrorKind::InvalidAngle,
                ValidationError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            },
            AgentError::Cancelled { .. } => ErrorKind::Cancelled,
            AgentError::Transport(e) => ErrorKind::Transport(e.kind),
            AgentError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// 是否可重试：不安全指令、凭据问题、帧格式错误与配置错误不可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::UnsafeInput(_) => false,
            AgentError::Provider(e) => e.is_retryable(),
            AgentError::Transport(e) => e.retryable,
            AgentError::ConfigError(_) => false,
            _ => true,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "hint", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// 请用户换一种说法（输入过长、解析失败、参数越界）
    Rephrase(String),
    /// 原样重试（限流、超时、请求失败）
    Retry,
    /// 重新建立控制通道
    Reconnect,
    /// 终止，不提供重试入口
    Abort,
}
