//! CostEstimator：启发式耗时 / 电量估算
//!
//! 逐条累加，电量额外加固定安全余量并封顶 100%。结果仅供参考，不影响执行。

use serde::{Deserialize, Serialize};

use super::validator::{is_movement, is_rotation};
use super::DroneCommand;

/// 估算结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub estimated_time_sec: f64,
    pub battery_required_pct: f64,
}

/// 估算参数：单位耗时与单位电量
#[derive(Debug, Clone)]
pub struct CostEstimator {
    /// 起飞 / 降落固定耗时（秒）
    pub takeoff_land_secs: f64,
    /// 平移速度（cm/s）
    pub speed_cm_per_sec: f64,
    /// 旋转速度（°/s）
    pub rotation_deg_per_sec: f64,
    /// 移动 / 旋转后的稳定时间（秒）
    pub settle_secs: f64,
    /// 未指定 duration 时的悬停时间（秒）
    pub default_hover_secs: f64,
    /// 每 50cm 耗电 1%
    pub cm_per_battery_pct: f64,
    /// 每 90° 耗电 1%
    pub deg_per_battery_pct: f64,
    /// 固定安全余量（%）
    pub safety_margin_pct: f64,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self {
            takeoff_land_secs: 5.0,
            speed_cm_per_sec: 50.0,
            rotation_deg_per_sec: 90.0,
            settle_secs: 1.0,
            default_hover_secs: 3.0,
            cm_per_battery_pct: 50.0,
            deg_per_battery_pct: 90.0,
            safety_margin_pct: 10.0,
        }
    }
}

impl CostEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单条指令的 (秒, 电量%)
    fn command_cost(&self, cmd: &DroneCommand) -> (f64, f64) {
        let action = cmd.action.as_str();
        if is_movement(action) {
            let distance = cmd.number("distance").unwrap_or(0.0).max(0.0);
            return (
                distance / self.speed_cm_per_sec + self.settle_secs,
                distance / self.cm_per_battery_pct,
            );
        }
        if is_rotation(action) {
            let degrees = cmd.number("degrees").unwrap_or(0.0).max(0.0);
            return (
                degrees / self.rotation_deg_per_sec + self.settle_secs,
                degrees / self.deg_per_battery_pct,
            );
        }
        match action {
            "takeoff" => (self.takeoff_land_secs, 5.0),
            "land" => (self.takeoff_land_secs, 2.0),
            "hover" => {
                let secs = cmd.number("duration").unwrap_or(self.default_hover_secs).max(0.0);
                (secs, secs / 3.0)
            }
            "flip" => (2.0, 3.0),
            _ => (0.0, 0.0),
        }
    }

    pub fn estimate(&self, commands: &[DroneCommand]) -> CostEstimate {
        let (time, battery) = commands
            .iter()
            .map(|c| self.command_cost(c))
            .fold((0.0, 0.0), |(t, b), (ct, cb)| (t + ct, b + cb));

        CostEstimate {
            estimated_time_sec: time,
            battery_required_pct: (battery + self.safety_margin_pct).min(100.0),
        }
    }

    /// 根据序列生成安全提示，与 Provider 给出的提示合并展示
    pub fn safety_checks(&self, commands: &[DroneCommand], estimate: &CostEstimate) -> Vec<String> {
        let mut checks = vec![format!(
            "确认电量不低于 {:.0}%",
            estimate.battery_required_pct
        )];
        if commands.iter().any(|c| c.action == "takeoff") {
            checks.push("确认起飞区域周围无障碍物与人员".to_string());
        }
        if commands.iter().any(|c| c.action == "flip") {
            checks.push("翻转动作需至少 1 米净空高度".to_string());
        }
        if commands.last().map(|c| c.action.as_str()) != Some("land") {
            checks.push("序列未以降落结束，执行后请手动降落".to_string());
        }
        checks
    }
}
