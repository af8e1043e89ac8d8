//! ResponseParser：从 AI 回复中提取指令序列
//!
//! 先把整段文本当 JSON 解析；失败则查找 ```json ... ``` / ``` ... ``` 围栏块逐个尝试；
//! 都不行返回 ParseError。指令参数优先取 `params`，缺省时兼容旧字段 `parameters`。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::{DroneCommand, ParamValue, ParsedPlan};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("no structured command data found in response")]
    NoStructuredData,

    #[error("malformed command data: {0}")]
    Malformed(String),

    #[error("command #{index} is missing a string action")]
    MissingAction { index: usize },
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    commands: Vec<RawCommand>,
    #[serde(default, alias = "safety_checks")]
    #[serde(rename = "safetyChecks")]
    safety_checks: Vec<String>,
    #[serde(default, rename = "estimatedTime", alias = "estimatedTimeSec", alias = "estimated_time_sec")]
    estimated_time: Option<f64>,
    #[serde(default, rename = "batteryRequired", alias = "battery_required", alias = "battery_required_pct")]
    battery_required: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(default)]
    action: Option<serde_json::Value>,
    #[serde(default)]
    params: Option<BTreeMap<String, ParamValue>>,
    #[serde(default)]
    parameters: Option<BTreeMap<String, ParamValue>>,
    #[serde(default)]
    description: Option<String>,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)```").expect("valid fence regex")
    })
}

/// 解析 AI 回复为 ParsedPlan；不会 panic，所有失败以 ParseError 返回
pub fn parse_response(raw: &str) -> Result<ParsedPlan, ParseError> {
    let trimmed = raw.trim();

    let mut last_err = None;
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) if value.is_object() => match plan_from_value(value) {
            Ok(plan) => return Ok(plan),
            Err(e) => last_err = Some(e),
        },
        _ => {}
    }

    for caps in fence_regex().captures_iter(trimmed) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        match serde_json::from_str::<serde_json::Value>(inner) {
            Ok(value) if value.is_object() => match plan_from_value(value) {
                Ok(plan) => return Ok(plan),
                Err(e) => last_err = Some(e),
            },
            _ => continue,
        }
    }

    Err(last_err.unwrap_or(ParseError::NoStructuredData))
}

fn plan_from_value(value: serde_json::Value) -> Result<ParsedPlan, ParseError> {
    let raw: RawPlan =
        serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let commands = raw
        .commands
        .into_iter()
        .enumerate()
        .map(|(index, cmd)| normalize_command(index, cmd))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedPlan {
        commands,
        safety_checks: raw.safety_checks,
        estimated_time_sec: raw.estimated_time.unwrap_or(0.0),
        battery_required_pct: raw.battery_required.unwrap_or(0.0),
    })
}

fn normalize_command(index: usize, raw: RawCommand) -> Result<DroneCommand, ParseError> {
    let action = match raw.action {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_lowercase(),
        _ => return Err(ParseError::MissingAction { index }),
    };
    Ok(DroneCommand {
        action,
        params: raw.params.or(raw.parameters).unwrap_or_default(),
        description: raw.description,
    })
}
