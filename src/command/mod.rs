//! 指令层：数据模型、AI 回复解析、安全校验、成本估算
//!
//! parser 把 Provider 的自由文本变成 [`ParsedPlan`]，validator 做安全范围检查，
//! estimator 给出耗时与电量估算，三者都是纯同步逻辑。

pub mod estimator;
pub mod parser;
pub mod validator;

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};

pub use estimator::{CostEstimate, CostEstimator};
pub use parser::{parse_response, ParseError};
pub use validator::{
    validate, validate_commands, ValidationError, MOVEMENT_ACTIONS, ROTATION_ACTIONS,
    SUPPORTED_ACTIONS,
};

/// 指令参数值：数字或字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// 数字直接返回；字符串若能解析为数字也接受（模型偶尔输出 "100"）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::Number(_) => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

/// 单条无人机指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DroneCommand {
    /// 动作名，如 takeoff / forward / cw
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DroneCommand {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: BTreeMap::new(),
            description: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(ParamValue::as_f64)
    }
}

/// 解析器输出：指令序列 + Provider 给出的安全提示与估算
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPlan {
    pub commands: Vec<DroneCommand>,
    #[serde(default)]
    pub safety_checks: Vec<String>,
    /// 预计耗时（秒）
    #[serde(default, rename = "estimatedTime")]
    pub estimated_time_sec: f64,
    /// 预计所需电量（百分比）
    #[serde(default, rename = "batteryRequired")]
    pub battery_required_pct: f64,
}

/// 一次 analyze 的结果；生成后不可变，可被缓存复用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub success: bool,
    pub commands: Vec<DroneCommand>,
    pub safety_checks: Vec<String>,
    #[serde(rename = "estimatedTime")]
    pub estimated_time_sec: f64,
    #[serde(rename = "batteryRequired")]
    pub battery_required_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 机器可读错误类别，仅失败时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub retryable: bool,
    /// 建议的恢复动作，仅失败时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryAction>,
}

impl AnalysisResult {
    pub fn success(
        commands: Vec<DroneCommand>,
        safety_checks: Vec<String>,
        estimate: CostEstimate,
    ) -> Self {
        Self {
            success: true,
            commands,
            safety_checks,
            estimated_time_sec: estimate.estimated_time_sec,
            battery_required_pct: estimate.battery_required_pct,
            error: None,
            error_kind: None,
            retryable: false,
            recovery: None,
        }
    }

    /// 将对外暴露的错误转为结构化结果，供 UI / 日志消费
    pub fn from_error(err: &AgentError) -> Self {
        Self {
            success: false,
            commands: Vec::new(),
            safety_checks: Vec::new(),
            estimated_time_sec: 0.0,
            battery_required_pct: 0.0,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().as_str().to_string()),
            retryable: err.is_retryable(),
            recovery: Some(RecoveryEngine::new().handle(err)),
        }
    }
}
