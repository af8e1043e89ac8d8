//! Provider 层：抽象、系统提示词与 Mock 实现

pub mod mock;
pub mod prompt;
pub mod traits;

pub use mock::{MockProvider, ScriptedProvider};
pub use prompt::build_system_prompt;
pub use traits::{Prompt, Provider, ProviderError};
