//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DRONEPILOT__*` 覆盖（双下划线表示嵌套，如 `DRONEPILOT__PROVIDER__MODEL=gpt-4o`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::transport::ReconnectPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub provider: ProviderConfig,
    pub coordinator: CoordinatorSection,
    pub input: InputSection,
    pub transport: TransportSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [provider] 段：调用 AI 模型所需的参数，具体请求由外部 Provider 实现构造
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// 后端：openai / azure / deepseek / mock
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub endpoint: Option<String>,
    /// Azure 部署名
    pub deployment: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            endpoint: None,
            deployment: None,
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// [coordinator] 段：AI 调用超时与结果缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// 单次 AI 调用超时（秒）
    pub request_timeout_secs: u64,
    /// 缓存有效期（秒）
    pub cache_ttl_secs: u64,
    /// 过期清理间隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            cache_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl CoordinatorSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// [input] 段：输入预检
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputSection {
    pub max_length: usize,
    pub unsafe_keywords: Vec<String>,
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            max_length: 500,
            unsafe_keywords: default_unsafe_keywords(),
        }
    }
}

fn default_unsafe_keywords() -> Vec<String> {
    vec![
        "attack".into(),
        "weapon".into(),
        "crash into".into(),
        "kamikaze".into(),
        "hit the person".into(),
        "攻击".into(),
        "撞击".into(),
        "武器".into(),
    ]
}

/// [transport] 段：控制通道地址与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// 后端 WebSocket 地址，如 ws://127.0.0.1:8889/control
    pub url: Option<String>,
    pub connect_timeout_ms: u64,
    /// 等待单条指令结果的超时
    pub command_timeout_ms: u64,
    pub reconnect: ReconnectSection,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: 5_000,
            command_timeout_ms: 10_000,
            reconnect: ReconnectSection::default(),
        }
    }
}

/// [transport.reconnect] 段：指数退避参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

impl From<&ReconnectSection> for ReconnectPolicy {
    fn from(s: &ReconnectSection) -> Self {
        ReconnectPolicy {
            max_retries: s.max_retries,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DRONEPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DRONEPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DRONEPILOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.coordinator.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.coordinator.cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.coordinator.sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.transport.reconnect.max_retries, 5);
        assert_eq!(cfg.transport.reconnect.initial_delay_ms, 1000);
        assert_eq!(cfg.provider.provider, "mock");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[provider]
provider = "openai"
model = "gpt-4o"
max_tokens = 2048

[coordinator]
cache_ttl_secs = 60

[transport]
url = "ws://127.0.0.1:8889/control"

[transport.reconnect]
max_retries = 3
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.provider.provider, "openai");
        assert_eq!(cfg.provider.max_tokens, 2048);
        assert_eq!(cfg.provider.temperature, 0.2);
        assert_eq!(cfg.coordinator.cache_ttl_secs, 60);
        assert_eq!(cfg.coordinator.request_timeout_secs, 30);
        assert_eq!(cfg.transport.url.as_deref(), Some("ws://127.0.0.1:8889/control"));

        let policy = ReconnectPolicy::from(&cfg.transport.reconnect);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(1000));
    }
}
