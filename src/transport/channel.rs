//! 控制通道抽象
//!
//! [`Link`] 是一条已建立的双向通道：出站文本帧走 mpsc 发送端，入站事件（消息 / 错误 / 关闭）
//! 走 mpsc 接收端，作为会话的入站事件队列。[`Connector`] 负责建立 Link，
//! 生产环境用 WebSocket，测试与模拟用内存通道。

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::{TransportError, TransportErrorKind};

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(String),
    Error(String),
    Closed,
}

/// 已建立的通道
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// 内存通道的对端（模拟后端持有）
#[derive(Debug)]
pub struct RemoteEnd {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
}

impl RemoteEnd {
    pub fn reply(&self, frame: &serde_json::Value) -> bool {
        self.inbound.send(LinkEvent::Message(frame.to_string())).is_ok()
    }
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// 内存通道：返回 (本端, 对端)
    pub fn pair() -> (Link, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Link::new(out_tx, in_rx),
            RemoteEnd {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| {
            TransportError::new(TransportErrorKind::MessageSendFailed, "outbound channel closed")
        })
    }

    /// 下一条入站事件；对端全部释放后返回 None
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.inbound.recv().await
    }

    /// 非阻塞读取已排队的入站事件
    pub fn try_recv(&mut self) -> Result<LinkEvent, TryRecvError> {
        self.inbound.try_recv()
    }
}

/// 建立控制通道
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, TransportError>;

    fn describe(&self) -> String {
        "connector".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut link, mut remote) = Link::pair();
        link.send("hello".into()).unwrap();
        assert_eq!(remote.outbound.recv().await.as_deref(), Some("hello"));
        assert!(remote.reply(&serde_json::json!({"type": "status"})));
        assert!(matches!(link.recv().await, Some(LinkEvent::Message(_))));
    }

    #[tokio::test]
    async fn test_send_after_remote_dropped() {
        let (mut link, remote) = Link::pair();
        drop(remote);
        let err = link.send("x".into()).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::MessageSendFailed);
        assert!(link.recv().await.is_none());
    }

    #[test]
    fn test_try_recv_reports_queue_state() {
        let (mut link, remote) = Link::pair();
        assert_eq!(link.try_recv(), Err(TryRecvError::Empty));
        remote.inbound.send(LinkEvent::Closed).unwrap();
        assert_eq!(link.try_recv(), Ok(LinkEvent::Closed));
        drop(remote);
        assert_eq!(link.try_recv(), Err(TryRecvError::Disconnected));
    }
}
