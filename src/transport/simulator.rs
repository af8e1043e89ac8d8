//! 模拟后端：进程内的虚拟无人机
//!
//! 每次 connect 生成一条内存 Link，并启动任务按指令更新虚拟状态，回复 result 帧与 telemetry 帧。
//! 供 CLI `--simulate` 与测试使用，无需真实设备。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use super::{Connector, Link, OutboundFrame, RemoteEnd, TransportError};
use crate::command::ParamValue;

/// 虚拟无人机状态
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDrone {
    pub airborne: bool,
    pub battery_pct: f64,
    pub height_cm: f64,
    pub yaw_deg: f64,
    /// 已执行的动作（按顺序）
    pub history: Vec<String>,
}

impl Default for SimulatedDrone {
    fn default() -> Self {
        Self {
            airborne: false,
            battery_pct: 100.0,
            height_cm: 0.0,
            yaw_deg: 0.0,
            history: Vec::new(),
        }
    }
}

impl SimulatedDrone {
    fn number(params: &BTreeMap<String, ParamValue>, key: &str) -> f64 {
        params.get(key).and_then(ParamValue::as_f64).unwrap_or(0.0)
    }

    /// 执行一条指令，返回 Ok(说明) 或 Err(失败原因)
    pub fn apply(&mut self, action: &str, params: &BTreeMap<String, ParamValue>) -> Result<String, String> {
        let needs_air = !matches!(action, "takeoff" | "emergency" | "stop");
        if needs_air && !self.airborne {
            return Err(format!("{action}: drone is not airborne"));
        }
        match action {
            "takeoff" => {
                if self.airborne {
                    return Err("takeoff: already airborne".to_string());
                }
                self.airborne = true;
                self.height_cm = 80.0;
                self.battery_pct -= 5.0;
            }
            "land" => {
                self.airborne = false;
                self.height_cm = 0.0;
                self.battery_pct -= 2.0;
            }
            "up" => self.height_cm += Self::number(params, "distance"),
            "down" => {
                let d = Self::number(params, "distance");
                if self.height_cm - d < 20.0 {
                    return Err("down: would descend below minimum height".to_string());
                }
                self.height_cm -= d;
            }
            "forward" | "backward" | "left" | "right" => {}
            "cw" => self.yaw_deg = (self.yaw_deg + Self::number(params, "degrees")).rem_euclid(360.0),
            "ccw" => self.yaw_deg = (self.yaw_deg - Self::number(params, "degrees")).rem_euclid(360.0),
            "flip" => {
                if self.battery_pct < 50.0 {
                    return Err("flip: battery below 50%".to_string());
                }
                self.battery_pct -= 3.0;
            }
            "hover" | "stop" => {}
            "emergency" => {
                self.airborne = false;
                self.height_cm = 0.0;
            }
            other => return Err(format!("unknown command: {other}")),
        }
        if matches!(action, "up" | "down" | "forward" | "backward" | "left" | "right") {
            self.battery_pct -= Self::number(params, "distance") / 50.0;
        }
        self.battery_pct = self.battery_pct.max(0.0);
        self.history.push(action.to_string());
        Ok(format!("{action} ok"))
    }
}

/// 模拟后端连接器；多次 connect 共享同一架虚拟无人机
#[derive(Debug, Default, Clone)]
pub struct SimulatorConnector {
    drone: Arc<Mutex<SimulatedDrone>>,
}

impl SimulatorConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> SimulatedDrone {
        self.drone.lock().await.clone()
    }
}

#[async_trait]
impl Connector for SimulatorConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (link, remote) = Link::pair();
        tokio::spawn(run_backend(remote, Arc::clone(&self.drone)));
        Ok(link)
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}

async fn run_backend(mut remote: RemoteEnd, drone: Arc<Mutex<SimulatedDrone>>) {
    while let Some(text) = remote.outbound.recv().await {
        let frame: OutboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("simulator received invalid frame: {}", e);
                continue;
            }
        };
        let OutboundFrame::Command { action, params } = frame;
        let mut drone = drone.lock().await;
        let result = drone.apply(&action, &params);
        tracing::debug!(action = %action, ok = result.is_ok(), "simulator executed command");

        remote.reply(&json!({
            "type": "telemetry",
            "battery": drone.battery_pct,
            "height": drone.height_cm,
            "yaw": drone.yaw_deg,
        }));
        let reply = match result {
            Ok(message) => json!({"type": "result", "success": true, "message": message}),
            Err(message) => json!({"type": "result", "success": false, "message": message}),
        };
        if !remote.reply(&reply) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_takeoff() {
        let mut drone = SimulatedDrone::default();
        assert!(drone.apply("forward", &BTreeMap::new()).is_err());
        assert!(drone.apply("takeoff", &BTreeMap::new()).is_ok());
        assert!(drone.apply("takeoff", &BTreeMap::new()).is_err());
        assert!(drone.apply("land", &BTreeMap::new()).is_ok());
        assert_eq!(drone.history, vec!["takeoff", "land"]);
    }

    #[test]
    fn test_rotation_wraps() {
        let mut drone = SimulatedDrone::default();
        drone.apply("takeoff", &BTreeMap::new()).unwrap();
        let mut params = BTreeMap::new();
        params.insert("degrees".to_string(), ParamValue::Number(90.0));
        drone.apply("ccw", &params).unwrap();
        assert_eq!(drone.yaw_deg, 270.0);
    }
}
