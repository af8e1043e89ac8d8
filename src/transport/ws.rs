//! WebSocket 控制通道（tokio-tungstenite）
//!
//! 建连后拆分读写：写任务把 Link 出站帧写入 socket，读任务把 socket 消息转为 LinkEvent。
//! 任一方向出错即结束对应任务，会话据此感知断线。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Connector, Link, LinkEvent, TransportError};

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::connect_failure(e.to_string()))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                    tracing::warn!("WebSocket send error: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let event = match msg {
                    Ok(WsMessage::Text(text)) => LinkEvent::Message(text),
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => LinkEvent::Message(text),
                        Err(_) => LinkEvent::Error("invalid binary frame: not utf-8".to_string()),
                    },
                    Ok(WsMessage::Close(_)) => {
                        let _ = in_tx.send(LinkEvent::Closed);
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("WebSocket receive error: {}", e);
                        let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = in_tx.send(LinkEvent::Closed);
        });

        tracing::info!("Control channel connected: {}", self.url);
        Ok(Link::new(out_tx, in_rx))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
