//! 控制通道帧格式
//!
//! 出站：`{"type":"command","action":..., "params":{...}}`
//! 入站：`{"type":"result"|"status"|"telemetry", ...}`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::{DroneCommand, ParamValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Command {
        action: String,
        #[serde(default)]
        params: BTreeMap<String, ParamValue>,
    },
}

impl OutboundFrame {
    pub fn command(cmd: &DroneCommand) -> Self {
        OutboundFrame::Command {
            action: cmd.action.clone(),
            params: cmd.params.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Result {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Status {
        #[serde(flatten)]
        fields: serde_json::Map<String, serde_json::Value>,
    },
    Telemetry {
        #[serde(flatten)]
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

/// 单条指令在后端的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResult {
    /// 指令已发出但结果未返回前通道断开：无法确认是否执行，按失败上报
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(format!("connection lost before result: {}", reason.into())),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_shape() {
        let cmd = DroneCommand::new("forward")
            .with_param("distance", 100.0)
            .with_description("向前 1 米");
        let json = serde_json::to_value(OutboundFrame::command(&cmd)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "command", "action": "forward", "params": {"distance": 100.0}})
        );
    }

    #[test]
    fn test_inbound_frames() {
        let result: InboundFrame =
            serde_json::from_str(r#"{"type":"result","success":true,"message":"ok"}"#).unwrap();
        assert!(matches!(result, InboundFrame::Result { success: true, .. }));

        let telemetry: InboundFrame =
            serde_json::from_str(r#"{"type":"telemetry","battery":87,"height":120}"#).unwrap();
        match telemetry {
            InboundFrame::Telemetry { fields } => assert_eq!(fields["battery"], 87),
            other => panic!("unexpected frame {other:?}"),
        }

        assert!(serde_json::from_str::<InboundFrame>(r#"{"type":"video"}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>(r#"{"success":true}"#).is_err());
    }
}
