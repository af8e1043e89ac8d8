//! 系统提示词：动作词表、安全范围与回复 JSON Schema

use schemars::schema_for;

use crate::command::{ParsedPlan, SUPPORTED_ACTIONS};

const BASE_PROMPT: &str = "You are a drone flight planner. Convert the user's instruction into a \
sequence of discrete drone commands.\n\
Rules:\n\
- Movement commands (forward, backward, left, right, up, down) need params.distance in centimeters, between 20 and 500.\n\
- Rotation commands (cw, ccw) need params.degrees between 1 and 360.\n\
- hover accepts optional params.duration in seconds (max 60); flip needs params.direction (l, r, f, b).\n\
- Always start with takeoff if the drone must fly, and end with land unless told otherwise.\n\
- Refuse anything that could harm people or property by returning an empty commands array.\n\
Reply with a single JSON object and nothing else.";

/// 构建完整系统提示词（包含回复 schema）
pub fn build_system_prompt() -> String {
    let schema = serde_json::to_string_pretty(&schema_for!(ParsedPlan)).unwrap_or_default();
    format!(
        "{}\n\nSupported actions: {}\n\n## Reply JSON Schema (you must output valid JSON matching this)\n```json\n{}\n```",
        BASE_PROMPT,
        SUPPORTED_ACTIONS.join(", "),
        schema
    )
}
