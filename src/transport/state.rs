//! 连接状态机：单一状态变量 + 显式转移表

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// 驱动状态转移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// 手动建连
    Connect,
    /// 通道已打开
    Opened,
    /// 建连失败
    Failed { retryable: bool },
    /// 已连接通道出错或被关闭
    Lost,
    /// 手动触发重连
    ReconnectRequested,
    /// 重试次数耗尽
    RetriesExhausted,
    /// 取消正在进行的重连
    ReconnectCancelled,
    /// 主动断开
    Disconnect,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

/// 转移表
pub fn next_state(from: ConnectionState, event: ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    let to = match (from, event) {
        (S::Disconnected | S::Error, E::Connect) => S::Connecting,
        (S::Connecting | S::Reconnecting, E::Opened) => S::Connected,
        (S::Connecting | S::Reconnecting, E::Failed { retryable: true }) => S::Reconnecting,
        (S::Connecting | S::Reconnecting, E::Failed { retryable: false }) => S::Error,
        (S::Connected, E::Lost) => S::Reconnecting,
        (S::Disconnected | S::Error | S::Connected | S::Reconnecting, E::ReconnectRequested) => {
            S::Reconnecting
        }
        (S::Reconnecting, E::RetriesExhausted) => S::Disconnected,
        (S::Reconnecting, E::ReconnectCancelled) => S::Disconnected,
        (_, E::Disconnect) => S::Disconnected,
        _ => return None,
    };
    Some(to)
}

/// 连接状态机
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 应用事件，返回 (旧状态, 新状态)
    pub fn apply(
        &mut self,
        event: ConnectionEvent,
    ) -> Result<(ConnectionState, ConnectionState), InvalidTransition> {
        let from = self.state;
        let to = next_state(from, event).ok_or(InvalidTransition { from, event })?;
        self.state = to;
        Ok((from, to))
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent as E;
    use ConnectionState as S;

    #[test]
    fn test_happy_path() {
        let mut fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.apply(E::Connect), Ok((S::Disconnected, S::Connecting)));
        assert_eq!(fsm.apply(E::Opened), Ok((S::Connecting, S::Connected)));
        assert_eq!(fsm.apply(E::Lost), Ok((S::Connected, S::Reconnecting)));
        assert_eq!(fsm.apply(E::Failed { retryable: true }), Ok((S::Reconnecting, S::Reconnecting)));
        assert_eq!(fsm.apply(E::Opened), Ok((S::Reconnecting, S::Connected)));
    }

    #[test]
    fn test_exhaustion_is_terminal_until_manual_connect() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.apply(E::Connect).unwrap();
        fsm.apply(E::Opened).unwrap();
        fsm.apply(E::Lost).unwrap();
        assert_eq!(fsm.apply(E::RetriesExhausted), Ok((S::Reconnecting, S::Disconnected)));
        assert!(fsm.apply(E::Opened).is_err());
        assert_eq!(fsm.apply(E::ReconnectRequested), Ok((S::Disconnected, S::Reconnecting)));
    }

    #[test]
    fn test_non_retryable_failure_goes_to_error() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.apply(E::Connect).unwrap();
        assert_eq!(fsm.apply(E::Failed { retryable: false }), Ok((S::Connecting, S::Error)));
        assert_eq!(fsm.apply(E::Connect), Ok((S::Error, S::Connecting)));
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(next_state(S::Disconnected, E::Opened), None);
        assert_eq!(next_state(S::Disconnected, E::Lost), None);
        assert_eq!(next_state(S::Connected, E::Connect), None);
        assert_eq!(next_state(S::Connected, E::RetriesExhausted), None);
        let mut fsm = ConnectionStateMachine::new();
        let err = fsm.apply(E::Lost).unwrap_err();
        assert_eq!(err.from, S::Disconnected);
        assert_eq!(fsm.state(), S::Disconnected);
    }
}
