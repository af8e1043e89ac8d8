//! Agent 运行时
//!
//! analyze：输入预检 → 缓存 → Provider（带超时 / 取消）→ 解析 → 校验 → 估算，成功结果写回缓存；
//! execute：按序把指令送入 TransportSession，逐条等待结果，失败时按 FailurePolicy 中止或继续。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::{
    parse_response, validate, validate_commands, AnalysisResult, CostEstimator, DroneCommand,
    ParsedPlan,
};
use crate::config::{AppConfig, ProviderConfig};
use crate::coordinator::RequestCoordinator;
use crate::core::{AgentError, InputGuard};
use crate::llm::{build_system_prompt, Prompt, Provider};
use crate::transport::TransportSession;

/// analyze 默认使用的请求 id：新的分析请求顶替仍在进行中的旧请求
pub const ANALYZE_REQUEST_ID: &str = "analyze";

/// 某条指令失败后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 立即停止，后续指令不再发送
    Abort,
    /// 记录失败并继续执行剩余指令
    Continue,
}

/// 单条指令的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub index: usize,
    pub command: DroneCommand,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// 一次 execute 的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: String,
    pub outcomes: Vec<CommandOutcome>,
    /// 全部指令都已发送（不论成败）
    pub completed: bool,
    /// 触发中止的指令下标（Abort 策略下的失败，或传输不可恢复）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<usize>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// analyze_and_execute 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub analysis: AnalysisResult,
    pub execution: ExecutionReport,
}

/// 指令流水线 Agent：协调器与会话均为显式实例，经 Arc 共享
pub struct Agent {
    provider: Arc<dyn Provider>,
    provider_config: ProviderConfig,
    coordinator: Arc<RequestCoordinator>,
    guard: InputGuard,
    estimator: CostEstimator,
    transport: Option<Arc<TransportSession>>,
    system_prompt: String,
    /// 缓存后台清理；Agent 释放或 shutdown 时停止
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

/// 在当前 tokio 运行时上启动缓存清理；没有运行时（如同步上下文构造）时跳过
fn start_sweeper(
    coordinator: &RequestCoordinator,
    shutdown: &CancellationToken,
) -> Option<JoinHandle<()>> {
    if tokio::runtime::Handle::try_current().is_err() {
        tracing::debug!("no tokio runtime, analysis cache sweeper not started");
        return None;
    }
    Some(coordinator.spawn_sweeper(shutdown.clone()))
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let coordinator = Arc::new(RequestCoordinator::from_config(&config.coordinator));
        let shutdown = CancellationToken::new();
        let sweeper = start_sweeper(&coordinator, &shutdown);
        Self {
            provider,
            provider_config: config.provider.clone(),
            coordinator,
            guard: InputGuard::from_config(&config.input),
            estimator: CostEstimator::new(),
            transport: None,
            system_prompt: build_system_prompt(),
            shutdown,
            sweeper,
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<RequestCoordinator>) -> Self {
        if let Some(previous) = self.sweeper.take() {
            previous.abort();
        }
        self.sweeper = start_sweeper(&coordinator, &self.shutdown);
        self.coordinator = coordinator;
        self
    }

    pub fn with_transport(mut self, session: Arc<TransportSession>) -> Self {
        self.transport = Some(session);
        self
    }

    pub fn with_estimator(mut self, estimator: CostEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    pub fn transport(&self) -> Option<&Arc<TransportSession>> {
        self.transport.as_ref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 停止后台任务（缓存清理）
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 校验通过的计划 → 结果：估算耗时与电量，合并 Provider 与估算器的安全提示
    fn finish_plan(&self, plan: ParsedPlan) -> AnalysisResult {
        let estimate = self.estimator.estimate(&plan.commands);
        let mut safety_checks = plan.safety_checks;
        for check in self.estimator.safety_checks(&plan.commands, &estimate) {
            if !safety_checks.contains(&check) {
                safety_checks.push(check);
            }
        }
        AnalysisResult::success(plan.commands, safety_checks, estimate)
    }

    /// 分析自然语言指令（请求 id 固定为 "analyze"）
    pub async fn analyze(&self, text: &str) -> Result<AnalysisResult, AgentError> {
        self.analyze_with_id(ANALYZE_REQUEST_ID, text, None).await
    }

    /// 以指定请求 id 与超时分析；None 使用协调器默认超时
    pub async fn analyze_with_id(
        &self,
        request_id: &str,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<AnalysisResult, AgentError> {
        let input = self.guard.check(text)?;

        if let Some(hit) = self.coordinator.lookup(input).await {
            tracing::info!(request_id, "analysis served from cache");
            return Ok(hit);
        }

        let prompt = Prompt::new(self.system_prompt.clone(), input);
        let result = self
            .coordinator
            .call_with_timeout(request_id, timeout, |cancel| async move {
                let raw = self.provider.call(&prompt, &self.provider_config, cancel).await?;
                tracing::debug!(request_id, provider = self.provider.name(), len = raw.len(), "provider replied");
                let plan = parse_response(&raw)?;
                validate(&plan)?;
                Ok::<_, AgentError>(self.finish_plan(plan))
            })
            .await?;

        tracing::info!(
            request_id,
            commands = result.commands.len(),
            estimated_time = result.estimated_time_sec,
            battery = result.battery_required_pct,
            "analysis complete"
        );
        self.coordinator.store(input, result.clone()).await;
        Ok(result)
    }

    /// 取消进行中的分析请求
    pub async fn cancel(&self, request_id: &str) -> bool {
        self.coordinator.cancel(request_id).await
    }

    /// 按序执行指令：上一条有结果后才发送下一条
    pub async fn execute(
        &self,
        commands: &[DroneCommand],
        policy: FailurePolicy,
    ) -> Result<ExecutionReport, AgentError> {
        validate_commands(commands)?;
        let session = self
            .transport
            .as_ref()
            .ok_or_else(|| AgentError::ConfigError("no transport session configured".to_string()))?;

        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(run_id = %run_id, commands = commands.len(), ?policy, "executing command sequence");

        let mut outcomes = Vec::with_capacity(commands.len());
        let mut aborted_at = None;

        for (index, command) in commands.iter().enumerate() {
            let outcome = match session.send_command(command).await {
                Ok(result) => CommandOutcome {
                    index,
                    command: command.clone(),
                    success: result.success,
                    message: result.message,
                    data: result.data,
                },
                // 重连耗尽后通道不可用，无论策略如何都结束本次执行
                Err(e) if e.retryable => {
                    tracing::warn!(run_id = %run_id, index, "transport failed: {}", e);
                    outcomes.push(CommandOutcome {
                        index,
                        command: command.clone(),
                        success: false,
                        message: Some(e.to_string()),
                        data: None,
                    });
                    aborted_at = Some(index);
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let failed = !outcome.success;
            outcomes.push(outcome);
            if failed && policy == FailurePolicy::Abort {
                tracing::warn!(run_id = %run_id, index, action = %command.action, "aborting sequence");
                aborted_at = Some(index);
                break;
            }
        }

        let report = ExecutionReport {
            run_id,
            completed: outcomes.len() == commands.len(),
            outcomes,
            aborted_at,
        };
        tracing::info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "execution finished"
        );
        Ok(report)
    }

    /// 分析后执行；analyze 失败即返回错误，成功的结果至少含一条已校验指令
    pub async fn analyze_and_execute(
        &self,
        text: &str,
        policy: FailurePolicy,
    ) -> Result<PipelineOutcome, AgentError> {
        let analysis = self.analyze(text).await?;
        let execution = self.execute(&analysis.commands, policy).await?;
        Ok(PipelineOutcome {
            analysis,
            execution,
        })
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CancelReason, ErrorKind};
    use crate::llm::{ProviderError, ScriptedProvider};
    use crate::transport::{SessionOptions, SimulatorConnector};

    const PLAN_REPLY: &str = r#"Sure! Here is your plan:
```json
{"commands": [
  {"action": "takeoff", "params": {}, "description": "take off"},
  {"action": "forward", "params": {"distance": 100}, "description": "forward 1m"},
  {"action": "land", "params": {}, "description": "land"}
], "safetyChecks": ["clear airspace"], "estimatedTime": 1, "batteryRequired": 1}
```"#;

    fn agent_with(provider: Arc<ScriptedProvider>) -> Agent {
        Agent::new(provider, &AppConfig::default())
    }

    #[tokio::test]
    async fn test_analyze_end_to_end() {
        let provider = Arc::new(ScriptedProvider::new(PLAN_REPLY));
        let agent = agent_with(provider.clone());

        let result = agent.analyze("take off, fly forward 100, then land").await.unwrap();
        assert!(result.success);
        assert_eq!(result.commands.len(), 3);
        assert!(result.estimated_time_sec > 10.0);
        assert!(result.battery_required_pct <= 100.0);
        assert!(result.safety_checks.contains(&"clear airspace".to_string()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(ScriptedProvider::new(PLAN_REPLY));
        let agent = agent_with(provider.clone());

        let first = agent.analyze("take off and land").await.unwrap();
        let second = agent.analyze("  take off   and land ").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry_calls_provider_again() {
        let provider = Arc::new(ScriptedProvider::new(PLAN_REPLY));
        let agent = agent_with(provider.clone());

        agent.analyze("take off and land").await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        agent.analyze("take off and land").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_guard_rejects_before_provider() {
        let provider = Arc::new(ScriptedProvider::new(PLAN_REPLY));
        let agent = agent_with(provider.clone());

        assert!(matches!(agent.analyze("   ").await, Err(AgentError::EmptyInput)));
        let long = "a".repeat(501);
        assert!(matches!(
            agent.analyze(&long).await,
            Err(AgentError::InputTooLong { len: 501, max: 500 })
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_plan_not_cached() {
        let provider = Arc::new(ScriptedProvider::new(
            r#"{"commands": [{"action": "forward", "params": {"distance": 5000}}]}"#,
        ));
        let agent = agent_with(provider.clone());

        let err = agent.analyze("fly very far").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDistance);
        assert!(agent.analyze("fly very far").await.is_err());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::MissingCredentials(
            "openai".into(),
        )));
        let agent = agent_with(provider);

        let err = agent.analyze("take off").await.unwrap_err();
        assert!(!err.is_retryable());
        let structured = AnalysisResult::from_error(&err);
        assert!(!structured.success);
        assert!(structured.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_times_out() {
        let provider =
            Arc::new(ScriptedProvider::new(PLAN_REPLY).with_delay(Duration::from_secs(60)));
        let agent = agent_with(provider);

        let err = agent
            .analyze_with_id("slow", "take off", Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Cancelled { reason: CancelReason::Timeout, .. }
        ));
        assert_eq!(agent.coordinator().stats().await.active_requests, 0);
    }

    #[tokio::test]
    async fn test_execute_requires_transport() {
        let agent = agent_with(Arc::new(ScriptedProvider::new(PLAN_REPLY)));
        let err = agent
            .execute(&[DroneCommand::new("takeoff")], FailurePolicy::Abort)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    fn simulated_agent() -> (Agent, SimulatorConnector) {
        let connector = SimulatorConnector::new();
        let session = Arc::new(TransportSession::new(
            Arc::new(connector.clone()),
            SessionOptions::default(),
        ));
        let agent = agent_with(Arc::new(ScriptedProvider::new(PLAN_REPLY))).with_transport(session);
        (agent, connector)
    }

    #[tokio::test]
    async fn test_execute_abort_stops_at_failure() {
        let (agent, connector) = simulated_agent();
        // forward 在起飞前执行会失败
        let commands = vec![
            DroneCommand::new("forward").with_param("distance", 100.0),
            DroneCommand::new("takeoff"),
            DroneCommand::new("land"),
        ];

        let report = agent.execute(&commands, FailurePolicy::Abort).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.aborted_at, Some(0));
        assert!(!report.completed);
        assert!(connector.snapshot().await.history.is_empty());
    }

    #[tokio::test]
    async fn test_execute_continue_runs_everything() {
        let (agent, connector) = simulated_agent();
        let commands = vec![
            DroneCommand::new("forward").with_param("distance", 100.0),
            DroneCommand::new("takeoff"),
            DroneCommand::new("land"),
        ];

        let report = agent.execute(&commands, FailurePolicy::Continue).await.unwrap();
        assert!(report.completed);
        assert_eq!(report.aborted_at, None);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(connector.snapshot().await.history, vec!["takeoff", "land"]);
    }

    #[tokio::test]
    async fn test_analyze_and_execute() {
        let (agent, connector) = simulated_agent();
        let outcome = agent
            .analyze_and_execute("take off, fly forward 100, then land", FailurePolicy::Abort)
            .await
            .unwrap();
        let execution = outcome.execution;
        assert!(execution.completed);
        assert_eq!(execution.succeeded(), 3);
        let drone = connector.snapshot().await;
        assert_eq!(drone.history, vec!["takeoff", "forward", "land"]);
        assert!(!drone.airborne);
    }

    #[tokio::test]
    async fn test_execute_rejects_out_of_range_before_sending() {
        let (agent, connector) = simulated_agent();
        let commands = vec![
            DroneCommand::new("takeoff"),
            DroneCommand::new("forward").with_param("distance", 5000.0),
        ];

        let err = agent.execute(&commands, FailurePolicy::Continue).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDistance);
        assert!(connector.snapshot().await.history.is_empty());
        let session = agent.transport().unwrap();
        assert_eq!(session.state(), crate::transport::ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_sequence() {
        let (agent, _connector) = simulated_agent();
        let err = agent.execute(&[], FailurePolicy::Abort).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyCommandList);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_evicts_unread_entries() {
        let agent = agent_with(Arc::new(ScriptedProvider::new(PLAN_REPLY)));
        assert!(agent.sweeper_running());

        agent.analyze("take off and land").await.unwrap();
        assert_eq!(agent.coordinator().stats().await.entries, 1);

        tokio::time::sleep(Duration::from_secs(370)).await;
        let stats = agent.coordinator().stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);

        agent.shutdown();
        for _ in 0..10 {
            if !agent.sweeper_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!agent.sweeper_running());
    }

    #[test]
    fn test_agent_without_runtime_skips_sweeper() {
        let agent = agent_with(Arc::new(ScriptedProvider::new(PLAN_REPLY)));
        assert!(!agent.sweeper_running());
    }
}
