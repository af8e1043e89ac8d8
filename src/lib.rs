//! DronePilot - 自然语言无人机指令流水线
//!
//! 模块划分：
//! - **agent**: Agent 运行时（analyze / execute / analyze_and_execute）
//! - **command**: 指令模型、回复解析、安全校验、耗时与电量估算
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **coordinator**: 结果缓存（TTL）与按 id 的超时 / 取消
//! - **core**: 错误类型、输入预检、恢复策略
//! - **llm**: Provider 抽象、系统提示词与 Mock 实现
//! - **observability**: 日志初始化
//! - **transport**: 自愈控制通道（状态机、指数退避重连、帧协议）

pub mod agent;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod llm;
pub mod observability;
pub mod transport;

pub use agent::{Agent, CommandOutcome, ExecutionReport, FailurePolicy, PipelineOutcome};
pub use command::{AnalysisResult, DroneCommand};
pub use core::AgentError;
