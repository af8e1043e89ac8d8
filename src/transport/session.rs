//! TransportSession：自愈的控制通道会话
//!
//! - 状态只通过 [`ConnectionStateMachine`] 转移，变化经 watch 与广播通知观察者
//! - 断线后进入迭代式重连循环：按 [`ReconnectPolicy`] 退避，成功则计数清零，耗尽则回到 disconnected
//! - 同一时间只允许一个重连序列（原子标记），其余调用方等待该序列结束
//! - 指令严格一发一收：发送后在入站队列上等待 result 帧，status / telemetry 帧转发给订阅者
//! - 空闲期间排队的关闭 / 错误事件在下一次发送前处理，按断线走重连与重发
//! - 等待结果时 Link 移出互斥锁，disconnect 随时可打断

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::{
    CommandResult, ConnectionEvent, ConnectionState, ConnectionStateMachine, Connector,
    InboundFrame, Link, LinkEvent, OutboundFrame, ReconnectPolicy, TransportError,
    TransportErrorKind,
};
use crate::command::DroneCommand;
use crate::config::TransportSection;

/// 会话事件（供 UI / 日志订阅）
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    Reconnected {
        attempt: u32,
    },
    /// 重试耗尽，终态失败
    ReconnectFailed {
        attempts: u32,
    },
    Status(serde_json::Map<String, serde_json::Value>),
    Telemetry(serde_json::Map<String, serde_json::Value>),
}

/// 会话超时参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&TransportSection::default())
    }
}

impl SessionOptions {
    pub fn from_config(config: &TransportSection) -> Self {
        Self {
            policy: ReconnectPolicy::from(&config.reconnect),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        }
    }
}

pub struct TransportSession {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    fsm: Mutex<ConnectionStateMachine>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    link: Mutex<Option<Link>>,
    connect_lock: Mutex<()>,
    /// 同一时间只有一条指令在途
    send_lock: Mutex<()>,
    /// 每次主动断开加一，打断等待中的指令
    disconnect_epoch: watch::Sender<u64>,
    /// 重连序列进行中
    reconnecting: AtomicBool,
    /// 每结束一个重连序列加一，等待方据此醒来
    reconnect_epoch: watch::Sender<u64>,
    /// 已尝试的重连次数
    attempt: AtomicU32,
    reconnect_cancel: Mutex<Option<CancellationToken>>,
}

impl TransportSession {
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);
        let (reconnect_epoch, _) = watch::channel(0);
        let (disconnect_epoch, _) = watch::channel(0);
        Self {
            connector,
            options,
            fsm: Mutex::new(ConnectionStateMachine::new()),
            state_tx,
            events,
            link: Mutex::new(None),
            connect_lock: Mutex::new(()),
            send_lock: Mutex::new(()),
            disconnect_epoch,
            reconnecting: AtomicBool::new(false),
            reconnect_epoch,
            attempt: AtomicU32::new(0),
            reconnect_cancel: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn retry_count(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.options.policy
    }

    async fn transition(&self, event: ConnectionEvent) -> ConnectionState {
        let mut fsm = self.fsm.lock().await;
        match fsm.apply(event) {
            Ok((from, to)) => {
                if from != to {
                    tracing::info!(%from, %to, "connection state changed");
                    self.state_tx.send_replace(to);
                    let _ = self.events.send(SessionEvent::StateChanged { from, to });
                }
                to
            }
            Err(e) => {
                tracing::debug!("{}", e);
                fsm.state()
            }
        }
    }

    async fn open_link(&self) -> Result<Link, TransportError> {
        match tokio::time::timeout(self.options.connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::new(
                TransportErrorKind::ConnectionTimeout,
                format!("connect to {} timed out", self.connector.describe()),
            )),
        }
    }

    /// 建立连接；可重试的失败会转入重连循环
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Reconnecting => {
                drop(_guard);
                return self.reconnect().await;
            }
            _ => {}
        }

        self.transition(ConnectionEvent::Connect).await;
        match self.open_link().await {
            Ok(link) => {
                *self.link.lock().await = Some(link);
                self.transition(ConnectionEvent::Opened).await;
                self.attempt.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) if e.retryable => {
                tracing::warn!("Initial connect failed: {}", e);
                self.transition(ConnectionEvent::Failed { retryable: true }).await;
                drop(_guard);
                self.reconnect().await
            }
            Err(e) => {
                tracing::warn!("Connect failed (not retryable): {}", e);
                self.transition(ConnectionEvent::Failed { retryable: false }).await;
                Err(e)
            }
        }
    }

    /// 启动（或等待已在进行的）重连序列
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let mut epoch = self.reconnect_epoch.subscribe();
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.wait_for_reconnect(&mut epoch).await;
        }

        let cancel = CancellationToken::new();
        *self.reconnect_cancel.lock().await = Some(cancel.clone());
        self.transition(ConnectionEvent::ReconnectRequested).await;

        let result = self.reconnect_loop(&cancel).await;

        *self.reconnect_cancel.lock().await = None;
        self.reconnecting.store(false, Ordering::SeqCst);
        self.reconnect_epoch.send_modify(|e| *e += 1);
        result
    }

    async fn wait_for_reconnect(&self, epoch: &mut watch::Receiver<u64>) -> Result<(), TransportError> {
        while self.reconnecting.load(Ordering::SeqCst) {
            if epoch.changed().await.is_err() {
                break;
            }
        }
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(TransportError::new(
                TransportErrorKind::ConnectionFailed,
                format!("reconnect did not succeed (state: {state})"),
            )),
        }
    }

    async fn reconnect_loop(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let policy = &self.options.policy;
        loop {
            let attempt = self.attempt.load(Ordering::SeqCst) + 1;
            if attempt > policy.max_retries {
                let attempts = policy.max_retries;
                tracing::warn!(attempts, "reconnect attempts exhausted");
                self.transition(ConnectionEvent::RetriesExhausted).await;
                self.attempt.store(0, Ordering::SeqCst);
                let _ = self.events.send(SessionEvent::ReconnectFailed { attempts });
                return Err(TransportError::new(
                    TransportErrorKind::ConnectionFailed,
                    format!("reconnect failed after {attempts} attempts"),
                ));
            }
            self.attempt.store(attempt, Ordering::SeqCst);

            let delay = policy.delay_for(attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            let _ = self.events.send(SessionEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(attempt, "reconnect cancelled");
                    self.transition(ConnectionEvent::ReconnectCancelled).await;
                    return Err(TransportError::new(
                        TransportErrorKind::ConnectionClosed,
                        "reconnect cancelled",
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open_link().await {
                Ok(link) => {
                    *self.link.lock().await = Some(link);
                    self.transition(ConnectionEvent::Opened).await;
                    self.attempt.store(0, Ordering::SeqCst);
                    tracing::info!(attempt, "reconnected");
                    let _ = self.events.send(SessionEvent::Reconnected { attempt });
                    return Ok(());
                }
                Err(e) if !e.retryable => {
                    tracing::warn!(attempt, "reconnect failed (not retryable): {}", e);
                    self.transition(ConnectionEvent::Failed { retryable: false }).await;
                    self.attempt.store(0, Ordering::SeqCst);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(attempt, "reconnect attempt failed: {}", e);
                    self.transition(ConnectionEvent::Failed { retryable: true }).await;
                }
            }
        }
    }

    /// 停止等待中的重连，退出 reconnecting，不清零重试计数
    pub async fn cancel_reconnect(&self) -> bool {
        match self.reconnect_cancel.lock().await.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消等待中的重连并清零重试计数
    pub async fn reset(&self) {
        self.cancel_reconnect().await;
        self.attempt.store(0, Ordering::SeqCst);
    }

    /// 主动断开
    pub async fn disconnect(&self) {
        self.reset().await;
        self.link.lock().await.take();
        self.transition(ConnectionEvent::Disconnect).await;
        self.disconnect_epoch.send_modify(|e| *e += 1);
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Reconnecting => self.reconnect().await,
            _ => self.connect().await,
        }
    }

    /// 已连接的通道失效：丢弃 Link 并进入重连
    async fn handle_link_lost(&self, err: &TransportError) -> Result<(), TransportError> {
        tracing::warn!("Control channel lost: {}", err);
        self.transition(ConnectionEvent::Lost).await;
        self.reconnect().await
    }

    /// 发送一条指令并等待其结果
    ///
    /// 帧未发出（空闲期间已断线或发送失败）时重连后重发；等待结果期间断线则重连后把该指令报告为失败，不重发。
    pub async fn send_command(&self, cmd: &DroneCommand) -> Result<CommandResult, TransportError> {
        let text = serde_json::to_string(&OutboundFrame::command(cmd))
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidMessage, e.to_string()))?;

        let _in_flight = self.send_lock.lock().await;
        let mut disconnected = self.disconnect_epoch.subscribe();

        let mut last_error = None;
        for _ in 0..=self.options.policy.max_retries {
            self.ensure_connected().await?;

            let Some(mut link) = self.link.lock().await.take() else {
                continue;
            };

            if let Err(e) = self.drain_idle(&mut link) {
                drop(link);
                self.handle_link_lost(&e).await?;
                last_error = Some(e);
                continue;
            }

            tracing::debug!(action = %cmd.action, "sending command frame");
            if let Err(e) = link.send(text.clone()) {
                drop(link);
                self.handle_link_lost(&e).await?;
                last_error = Some(e);
                continue;
            }

            return match self.await_result(&mut link, &mut disconnected).await {
                Ok(Some(result)) => {
                    self.restore_link(link).await;
                    Ok(result)
                }
                Ok(None) => Err(TransportError::new(
                    TransportErrorKind::ConnectionClosed,
                    "session disconnected while awaiting result",
                )),
                Err(e) if !e.retryable => {
                    self.restore_link(link).await;
                    Err(e)
                }
                Err(e) => {
                    drop(link);
                    self.handle_link_lost(&e).await?;
                    Ok(CommandResult::interrupted(e.message))
                }
            };
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::new(TransportErrorKind::MessageSendFailed, "command could not be delivered")
        }))
    }

    /// 发送前处理空闲期间排队的入站事件；通道已关闭或出错时返回错误
    fn drain_idle(&self, link: &mut Link) -> Result<(), TransportError> {
        loop {
            match link.try_recv() {
                Ok(LinkEvent::Message(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(InboundFrame::Result { .. }) => {
                        tracing::debug!("discarding stale result frame");
                    }
                    Ok(InboundFrame::Status { fields }) => {
                        let _ = self.events.send(SessionEvent::Status(fields));
                    }
                    Ok(InboundFrame::Telemetry { fields }) => {
                        let _ = self.events.send(SessionEvent::Telemetry(fields));
                    }
                    Err(e) => tracing::warn!("discarding invalid idle frame: {}", e),
                },
                Ok(LinkEvent::Error(raw)) => {
                    let mut err = TransportError::classify(raw);
                    if !err.retryable {
                        err = TransportError::new(TransportErrorKind::ConnectionFailed, err.message);
                    }
                    return Err(err);
                }
                Ok(LinkEvent::Closed) | Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::new(
                        TransportErrorKind::ConnectionClosed,
                        "control channel closed while idle",
                    ))
                }
                Err(TryRecvError::Empty) => return Ok(()),
            }
        }
    }

    /// 指令结束后把 Link 放回；期间已断开或已换成新通道则丢弃
    async fn restore_link(&self, link: Link) {
        let mut slot = self.link.lock().await;
        if slot.is_none() && self.state() == ConnectionState::Connected {
            *slot = Some(link);
        }
    }

    /// 等待 result 帧；主动断开时返回 Ok(None)
    async fn await_result(
        &self,
        link: &mut Link,
        disconnected: &mut watch::Receiver<u64>,
    ) -> Result<Option<CommandResult>, TransportError> {
        let deadline = tokio::time::sleep(self.options.command_timeout);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                _ = disconnected.changed() => {
                    tracing::info!("disconnect requested while awaiting command result");
                    return Ok(None);
                }
                _ = &mut deadline => {
                    return Err(TransportError::new(
                        TransportErrorKind::ConnectionTimeout,
                        "timed out waiting for command result",
                    ));
                }
                event = link.recv() => event,
            };

            let text = match event {
                Some(LinkEvent::Message(text)) => text,
                Some(LinkEvent::Error(raw)) => return Err(TransportError::classify(raw)),
                Some(LinkEvent::Closed) | None => {
                    return Err(TransportError::new(
                        TransportErrorKind::ConnectionClosed,
                        "control channel closed",
                    ))
                }
            };

            let frame: InboundFrame = serde_json::from_str(&text).map_err(|e| {
                TransportError::new(
                    TransportErrorKind::InvalidMessage,
                    format!("invalid inbound frame: {e}"),
                )
            })?;

            match frame {
                InboundFrame::Result {
                    success,
                    message,
                    data,
                } => {
                    return Ok(Some(CommandResult {
                        success,
                        message,
                        data,
                    }))
                }
                InboundFrame::Status { fields } => {
                    let _ = self.events.send(SessionEvent::Status(fields));
                }
                InboundFrame::Telemetry { fields } => {
                    let _ = self.events.send(SessionEvent::Telemetry(fields));
                }
            }
        }
    }
}
