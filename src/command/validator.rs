//! CommandValidator：指令白名单与物理安全范围
//!
//! 按顺序检查，遇到第一个问题即失败（fail-closed）；纯函数，不做 I/O，不修改输入。

use thiserror::Error;

use super::{DroneCommand, ParsedPlan};

/// 支持的动作
pub const SUPPORTED_ACTIONS: &[&str] = &[
    "takeoff", "land", "up", "down", "left", "right", "forward", "backward", "cw", "ccw",
    "hover", "flip", "emergency", "stop",
];

/// 需要 distance 参数的移动动作
pub const MOVEMENT_ACTIONS: &[&str] = &["forward", "backward", "left", "right", "up", "down"];

/// 需要 degrees 参数的旋转动作
pub const ROTATION_ACTIONS: &[&str] = &["cw", "ccw"];

/// 移动距离范围（厘米）
pub const DISTANCE_RANGE: (f64, f64) = (20.0, 500.0);
/// 旋转角度范围（度）
pub const DEGREES_RANGE: (f64, f64) = (1.0, 360.0);
/// 悬停时长上限（秒）
pub const MAX_HOVER_SECS: f64 = 60.0;

const FLIP_DIRECTIONS: &[&str] = &["l", "r", "f", "b"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("empty command list")]
    EmptyCommandList,

    #[error("unsupported command #{index}: {action}")]
    UnsupportedCommand { index: usize, action: String },

    #[error("distance parameter invalid for command #{index} ({action}): must be between 20 and 500")]
    InvalidDistance { index: usize, action: String },

    #[error("angle parameter invalid for command #{index} ({action}): must be between 1 and 360")]
    InvalidAngle { index: usize, action: String },

    #[error("{param} parameter invalid for command #{index} ({action}): {reason}")]
    InvalidParameter {
        index: usize,
        action: String,
        param: String,
        reason: String,
    },
}

pub fn is_movement(action: &str) -> bool {
    MOVEMENT_ACTIONS.contains(&action)
}

pub fn is_rotation(action: &str) -> bool {
    ROTATION_ACTIONS.contains(&action)
}

fn in_range(value: Option<f64>, (min, max): (f64, f64)) -> bool {
    matches!(value, Some(v) if v.is_finite() && v >= min && v <= max)
}

/// 校验解析结果
pub fn validate(plan: &ParsedPlan) -> Result<(), ValidationError> {
    validate_commands(&plan.commands)
}

pub fn validate_commands(commands: &[DroneCommand]) -> Result<(), ValidationError> {
    if commands.is_empty() {
        return Err(ValidationError::EmptyCommandList);
    }
    for (index, cmd) in commands.iter().enumerate() {
        validate_command(index, cmd)?;
    }
    Ok(())
}

fn validate_command(index: usize, cmd: &DroneCommand) -> Result<(), ValidationError> {
    let action = cmd.action.as_str();
    if !SUPPORTED_ACTIONS.contains(&action) {
        return Err(ValidationError::UnsupportedCommand {
            index,
            action: cmd.action.clone(),
        });
    }

    if is_movement(action) && !in_range(cmd.number("distance"), DISTANCE_RANGE) {
        return Err(ValidationError::InvalidDistance {
            index,
            action: cmd.action.clone(),
        });
    }

    if is_rotation(action) && !in_range(cmd.number("degrees"), DEGREES_RANGE) {
        return Err(ValidationError::InvalidAngle {
            index,
            action: cmd.action.clone(),
        });
    }

    match action {
        "hover" => {
            if cmd.params.contains_key("duration")
                && !matches!(cmd.number("duration"), Some(d) if d > 0.0 && d <= MAX_HOVER_SECS)
            {
                return Err(ValidationError::InvalidParameter {
                    index,
                    action: cmd.action.clone(),
                    param: "duration".into(),
                    reason: format!("must be within (0, {MAX_HOVER_SECS}] seconds"),
                });
            }
        }
        "flip" => {
            let direction = cmd.params.get("direction").and_then(|v| v.as_str());
            if !matches!(direction, Some(d) if FLIP_DIRECTIONS.contains(&d)) {
                return Err(ValidationError::InvalidParameter {
                    index,
                    action: cmd.action.clone(),
                    param: "direction".into(),
                    reason: "must be one of l, r, f, b".into(),
                });
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(commands: Vec<DroneCommand>) -> ParsedPlan {
        ParsedPlan {
            commands,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_list_rejected() {
        let err = validate(&plan(vec![])).unwrap_err();
        assert_eq!(err, ValidationError::EmptyCommandList);
        assert!(err.to_string().contains("empty command list"));
    }

    #[test]
    fn test_unsupported_action() {
        let err = validate(&plan(vec![DroneCommand::new("barrel_roll")])).unwrap_err();
        assert!(err.to_string().contains("unsupported command"));
    }

    #[test]
    fn test_distance_range() {
        for action in MOVEMENT_ACTIONS {
            for bad in [19.0, 501.0, -50.0, 0.0] {
                let err = validate(&plan(vec![DroneCommand::new(*action).with_param("distance", bad)]))
                    .unwrap_err();
                assert!(matches!(err, ValidationError::InvalidDistance { .. }), "{action} {bad}");
                assert!(err.to_string().contains("distance parameter invalid"));
            }
            for good in [20.0, 100.0, 500.0] {
                assert!(validate(&plan(vec![DroneCommand::new(*action).with_param("distance", good)])).is_ok());
            }
        }
    }

    #[test]
    fn test_missing_distance() {
        let err = validate(&plan(vec![DroneCommand::new("forward")])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDistance { index: 0, .. }));
    }

    #[test]
    fn test_degrees_range() {
        for action in ROTATION_ACTIONS {
            for bad in [0.0, 361.0, 720.0] {
                let err = validate(&plan(vec![DroneCommand::new(*action).with_param("degrees", bad)]))
                    .unwrap_err();
                assert!(err.to_string().contains("angle parameter invalid"));
            }
            for good in [1.0, 90.0, 360.0] {
                assert!(validate(&plan(vec![DroneCommand::new(*action).with_param("degrees", good)])).is_ok());
            }
        }
    }

    #[test]
    fn test_numeric_string_distance_accepted() {
        let cmd = DroneCommand::new("forward").with_param("distance", "100");
        assert!(validate(&plan(vec![cmd])).is_ok());
    }

    #[test]
    fn test_first_failure_reported() {
        let cmds = vec![
            DroneCommand::new("takeoff"),
            DroneCommand::new("forward").with_param("distance", 10.0),
            DroneCommand::new("teleport"),
        ];
        assert!(matches!(
            validate(&plan(cmds)),
            Err(ValidationError::InvalidDistance { index: 1, .. })
        ));
    }

    #[test]
    fn test_hover_and_flip() {
        assert!(validate(&plan(vec![DroneCommand::new("hover")])).is_ok());
        assert!(validate(&plan(vec![DroneCommand::new("hover").with_param("duration", 5.0)])).is_ok());
        assert!(validate(&plan(vec![DroneCommand::new("hover").with_param("duration", 120.0)])).is_err());
        assert!(validate(&plan(vec![DroneCommand::new("flip").with_param("direction", "f")])).is_ok());
        assert!(validate(&plan(vec![DroneCommand::new("flip")])).is_err());
    }
}
