//! 核心层：错误与恢复、输入预检

pub mod error;
pub mod guard;
pub mod recovery;

pub use error::{AgentError, CancelReason, ErrorKind, RecoveryAction};
pub use guard::InputGuard;
pub use recovery::RecoveryEngine;
