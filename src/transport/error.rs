//! 传输错误分类
//!
//! 把底层失败（连接拒绝、超时、关闭、发送失败、帧格式错误……）归入固定分类，
//! 仅 INVALID_MESSAGE 不可重试，其余都交给重连状态机处理。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportErrorKind {
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionClosed,
    MessageSendFailed,
    InvalidMessage,
    NetworkError,
    UnknownError,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            TransportErrorKind::ConnectionTimeout => "CONNECTION_TIMEOUT",
            TransportErrorKind::ConnectionClosed => "CONNECTION_CLOSED",
            TransportErrorKind::MessageSendFailed => "MESSAGE_SEND_FAILED",
            TransportErrorKind::InvalidMessage => "INVALID_MESSAGE",
            TransportErrorKind::NetworkError => "NETWORK_ERROR",
            TransportErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportErrorKind::InvalidMessage)
    }

    /// 按错误文本归类
    pub fn classify(raw: &str) -> Self {
        let msg = raw.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if has(&["timed out", "timeout"]) {
            TransportErrorKind::ConnectionTimeout
        } else if has(&["invalid", "malformed", "parse", "utf-8", "utf8", "json"]) {
            TransportErrorKind::InvalidMessage
        } else if has(&["refused", "failed to connect", "connection failed", "handshake"]) {
            TransportErrorKind::ConnectionFailed
        } else if has(&["closed", "reset", "broken pipe", "eof", "aborted"]) {
            TransportErrorKind::ConnectionClosed
        } else if has(&["send"]) {
            TransportErrorKind::MessageSendFailed
        } else if has(&["network", "unreachable", "dns", "resolve", "no route"]) {
            TransportErrorKind::NetworkError
        } else {
            TransportErrorKind::UnknownError
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            timestamp: Utc::now(),
        }
    }

    /// 由原始错误文本构造并自动归类
    pub fn classify(raw: impl Into<String>) -> Self {
        let message = raw.into();
        Self::new(TransportErrorKind::classify(&message), message)
    }

    /// 建连阶段的失败：无法归类或被误判为帧错误时一律视为 CONNECTION_FAILED
    pub fn connect_failure(raw: impl Into<String>) -> Self {
        let message = raw.into();
        let kind = match TransportErrorKind::classify(&message) {
            TransportErrorKind::InvalidMessage | TransportErrorKind::UnknownError => {
                TransportErrorKind::ConnectionFailed
            }
            kind => kind,
        };
        Self::new(kind, message)
    }
}
