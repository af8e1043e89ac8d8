//! DronePilot - 自然语言无人机指令流水线
//!
//! 入口：初始化日志、加载配置、分析命令行给出的指令并输出 JSON；
//! `--execute` 经 transport.url 的 WebSocket 执行，`--simulate` 使用进程内模拟后端。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use dronepilot::agent::{Agent, FailurePolicy};
use dronepilot::command::AnalysisResult;
use dronepilot::config::{load_config, AppConfig};
use dronepilot::llm::MockProvider;
use dronepilot::transport::{Connector, SessionOptions, SimulatorConnector, TransportSession};

const USAGE: &str = "usage: dronepilot [--execute | --simulate] [--continue] [--config PATH] <instruction>";

#[derive(Debug, Default)]
struct CliArgs {
    instruction: String,
    execute: bool,
    simulate: bool,
    keep_going: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--execute" => cli.execute = true,
            "--simulate" => cli.simulate = true,
            "--continue" => cli.keep_going = true,
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                cli.config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!("{}", USAGE);
    }
    cli.instruction = words.join(" ");
    Ok(cli)
}

fn build_connector(cli: &CliArgs, cfg: &AppConfig) -> anyhow::Result<Arc<dyn Connector>> {
    if cli.simulate {
        return Ok(Arc::new(SimulatorConnector::new()));
    }
    let url = cfg
        .transport
        .url
        .clone()
        .context("transport.url is not configured (set DRONEPILOT__TRANSPORT__URL or use --simulate)")?;
    #[cfg(feature = "websocket")]
    {
        Ok(Arc::new(dronepilot::transport::WsConnector::new(url)))
    }
    #[cfg(not(feature = "websocket"))]
    {
        bail!("built without the websocket feature, cannot connect to {}", url)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dronepilot::observability::init();

    let cli = parse_args()?;
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    if cfg.provider.provider != "mock" {
        tracing::warn!(
            provider = %cfg.provider.provider,
            "no HTTP provider is wired into the CLI, falling back to the mock planner"
        );
    }

    let mut agent = Agent::new(Arc::new(MockProvider), &cfg);

    if !(cli.execute || cli.simulate) {
        let result = match agent.analyze(&cli.instruction).await {
            Ok(result) => result,
            Err(e) => AnalysisResult::from_error(&e),
        };
        agent.shutdown();
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let connector = build_connector(&cli, &cfg)?;
    tracing::info!(channel = %connector.describe(), "using control channel");
    let session = Arc::new(TransportSession::new(
        connector,
        SessionOptions::from_config(&cfg.transport),
    ));
    agent = agent.with_transport(Arc::clone(&session));

    let policy = if cli.keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };
    let outcome = agent.analyze_and_execute(&cli.instruction, policy).await;
    session.disconnect().await;
    agent.shutdown();

    match outcome {
        Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        Err(e) => println!("{}", serde_json::to_string_pretty(&AnalysisResult::from_error(&e))?),
    }
    Ok(())
}
