//! Mock Provider（用于测试与离线运行，无需 API）
//!
//! - [`MockProvider`]：按关键词把用户原文拆成指令，输出带围栏的 JSON，便于本地跑通完整流程
//! - [`ScriptedProvider`]：固定回复 + 调用计数 + 可选延迟，供单元测试使用

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::command::{DroneCommand, ParsedPlan};
use crate::config::ProviderConfig;
use crate::llm::{Prompt, Provider, ProviderError};

const DEFAULT_DISTANCE_CM: f64 = 50.0;
const DEFAULT_DEGREES: f64 = 90.0;

fn clause_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*(?:,|;|，|；|。|\bthen\b|\band\b|然后|再)\s*").expect("valid clause regex")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"))
}

fn first_number(clause: &str) -> Option<f64> {
    number_regex()
        .find(clause)
        .and_then(|m| m.as_str().parse().ok())
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// 单个子句 → 指令；无法识别返回 None
fn clause_to_command(clause: &str) -> Option<DroneCommand> {
    let c = clause.to_lowercase();
    let number = first_number(&c);

    if contains_any(&c, &["take off", "takeoff", "take-off", "起飞"]) {
        return Some(DroneCommand::new("takeoff"));
    }
    if contains_any(&c, &["land", "降落"]) {
        return Some(DroneCommand::new("land"));
    }
    if contains_any(&c, &["hover", "悬停"]) {
        let mut cmd = DroneCommand::new("hover");
        if let Some(secs) = number {
            cmd = cmd.with_param("duration", secs);
        }
        return Some(cmd);
    }

    let degrees = number.unwrap_or(DEFAULT_DEGREES);
    if contains_any(&c, &["counterclockwise", "counter-clockwise", "ccw", "逆时针", "turn left", "rotate left", "左转"]) {
        return Some(DroneCommand::new("ccw").with_param("degrees", degrees));
    }
    if contains_any(&c, &["clockwise", "cw", "顺时针", "turn right", "rotate right", "右转"]) {
        return Some(DroneCommand::new("cw").with_param("degrees", degrees));
    }

    let mut distance = number.unwrap_or(DEFAULT_DISTANCE_CM);
    if contains_any(&c, &["meter", "米"]) && !contains_any(&c, &["cm", "厘米"]) {
        distance *= 100.0;
    }
    let movements: [(&str, &[&str]); 6] = [
        ("forward", &["forward", "ahead", "向前", "前进"]),
        ("backward", &["backward", "back", "向后", "后退"]),
        ("left", &["left", "向左"]),
        ("right", &["right", "向右"]),
        ("up", &["up", "ascend", "上升", "向上"]),
        ("down", &["down", "descend", "下降", "向下"]),
    ];
    movements
        .iter()
        .find(|(_, words)| contains_any(&c, words))
        .map(|(action, _)| DroneCommand::new(*action).with_param("distance", distance))
}

/// 关键词规划：把用户原文拆成指令序列
pub fn plan_from_text(text: &str) -> ParsedPlan {
    let commands: Vec<DroneCommand> = clause_regex()
        .split(text)
        .filter(|s| !s.trim().is_empty())
        .filter_map(clause_to_command)
        .collect();
    ParsedPlan {
        commands,
        safety_checks: vec!["Mock planner: verify the sequence before flight".to_string()],
        ..Default::default()
    }
}

/// Mock 客户端：离线关键词规划
#[derive(Debug, Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    async fn call(
        &self,
        prompt: &Prompt,
        _config: &ProviderConfig,
        _cancel: CancellationToken,
    ) -> Result<String, ProviderError> {
        let plan = plan_from_text(&prompt.user);
        let json = serde_json::to_string_pretty(&plan)
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(format!("Here is the flight plan:\n```json\n{}\n```", json))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 固定回复的 Provider：记录调用次数，可模拟慢响应
#[derive(Debug)]
pub struct ScriptedProvider {
    reply: Result<String, ProviderError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: ProviderError) -> Self {
        Self {
            reply: Err(err),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn call(
        &self,
        _prompt: &Prompt,
        _config: &ProviderConfig,
        cancel: CancellationToken,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ProviderError::RequestFailed("cancelled".to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.reply.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse_response;

    #[test]
    fn test_plan_from_english_text() {
        let plan = plan_from_text("take off, fly forward 100, then land");
        let actions: Vec<_> = plan.commands.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(actions, vec!["takeoff", "forward", "land"]);
        assert_eq!(plan.commands[1].number("distance"), Some(100.0));
    }

    #[test]
    fn test_plan_from_chinese_text() {
        let plan = plan_from_text("起飞，向左 1 米，顺时针 180 度，然后降落");
        let actions: Vec<_> = plan.commands.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(actions, vec!["takeoff", "left", "cw", "land"]);
        assert_eq!(plan.commands[1].number("distance"), Some(100.0));
        assert_eq!(plan.commands[2].number("degrees"), Some(180.0));
    }

    #[test]
    fn test_ccw_before_cw() {
        let plan = plan_from_text("rotate counterclockwise 45");
        assert_eq!(plan.commands[0].action, "ccw");
        assert_eq!(plan.commands[0].number("degrees"), Some(45.0));
    }

    #[tokio::test]
    async fn test_mock_reply_is_parseable() {
        let reply = MockProvider
            .call(
                &Prompt::new("sys", "take off then land"),
                &ProviderConfig::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(reply.contains("```json"));
        let plan = parse_response(&reply).unwrap();
        assert_eq!(plan.commands.len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_counts_calls() {
        let provider = ScriptedProvider::new("{}");
        let cfg = ProviderConfig::default();
        let prompt = Prompt::new("", "");
        provider.call(&prompt, &cfg, CancellationToken::new()).await.unwrap();
        provider.call(&prompt, &cfg, CancellationToken::new()).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }
}
