//! 传输层：把指令送到执行后端的自愈控制通道
//!
//! - **error**: 传输错误分类（仅 INVALID_MESSAGE 不可重试）
//! - **state**: 连接状态机与转移表
//! - **backoff**: 指数退避策略
//! - **frame**: command / result / status / telemetry 帧
//! - **channel**: Link 与 Connector 抽象（入站事件队列）
//! - **session**: TransportSession（重连循环、指令收发）
//! - **simulator**: 进程内模拟后端
//! - **ws**: WebSocket 连接器（feature = "websocket"）

pub mod backoff;
pub mod channel;
pub mod error;
pub mod frame;
pub mod session;
pub mod simulator;
pub mod state;
#[cfg(feature = "websocket")]
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use channel::{Connector, Link, LinkEvent, RemoteEnd};
pub use error::{TransportError, TransportErrorKind};
pub use frame::{CommandResult, InboundFrame, OutboundFrame};
pub use session::{SessionEvent, SessionOptions, TransportSession};
pub use simulator::{SimulatedDrone, SimulatorConnector};
pub use state::{ConnectionEvent, ConnectionState, ConnectionStateMachine, InvalidTransition};
#[cfg(feature = "websocket")]
pub use ws::WsConnector;
