//! 输入预检：空输入、超长输入、危险关键词
//!
//! 在调用 Provider 之前同步执行，失败即返回，不消耗任何 AI 调用。

use crate::config::InputSection;
use crate::core::AgentError;

/// 输入守卫：持有最大长度与危险关键词表（小写）
#[derive(Debug, Clone)]
pub struct InputGuard {
    max_length: usize,
    unsafe_keywords: Vec<String>,
}

impl InputGuard {
    pub fn new(max_length: usize, unsafe_keywords: Vec<String>) -> Self {
        Self {
            max_length,
            unsafe_keywords: unsafe_keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &InputSection) -> Self {
        Self::new(config.max_length, config.unsafe_keywords.clone())
    }

    /// 返回去除首尾空白后的输入
    pub fn check<'a>(&self, input: &'a str) -> Result<&'a str, AgentError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AgentError::EmptyInput);
        }
        let len = trimmed.chars().count();
        if len > self.max_length {
            return Err(AgentError::InputTooLong {
                len,
                max: self.max_length,
            });
        }
        let lowered = trimmed.to_lowercase();
        if let Some(keyword) = self.unsafe_keywords.iter().find(|k| lowered.contains(k.as_str())) {
            return Err(AgentError::UnsafeInput(keyword.clone()));
        }
        Ok(trimmed)
    }
}

impl Default for InputGuard {
    fn default() -> Self {
        Self::from_config(&InputSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejects_empty() {
        let guard = InputGuard::default();
        assert!(matches!(guard.check("   \n"), Err(AgentError::EmptyInput)));
    }

    #[test]
    fn test_guard_rejects_too_long() {
        let guard = InputGuard::new(10, vec![]);
        let err = guard.check("fly forward 100 then land").unwrap_err();
        assert!(matches!(err, AgentError::InputTooLong { max: 10, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_guard_rejects_unsafe_keyword_case_insensitive() {
        let guard = InputGuard::new(100, vec!["Attack".into()]);
        let err = guard.check("ATTACK the car").unwrap_err();
        assert!(matches!(err, AgentError::UnsafeInput(ref k) if k == "attack"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_guard_trims() {
        let guard = InputGuard::default();
        assert_eq!(guard.check("  take off  ").unwrap(), "take off");
    }
}
