//! RequestCoordinator：约束 AI 调用的成本与延迟
//!
//! 一个进程构造一个实例，通过 Arc 传给 Agent：
//! - **cache**：按归一化输入缓存 AnalysisResult（默认 TTL 5 分钟，60 秒清理一次）
//! - **request**：按 id 的在途请求表（超时、取消、同 id 顶替）

pub mod cache;
pub mod request;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::AnalysisResult;
use crate::config::CoordinatorSection;
use crate::core::AgentError;

pub use cache::{normalize_input, CachedEntry, ResultCache};
pub use request::RequestTable;

/// 协调器运行统计（用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub entries: usize,
    pub active_requests: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct RequestCoordinator {
    cache: Arc<ResultCache>,
    requests: RequestTable,
    default_timeout: Duration,
    sweep_interval: Duration,
}

impl RequestCoordinator {
    pub fn new(cache_ttl: Duration, default_timeout: Duration) -> Self {
        Self {
            cache: Arc::new(ResultCache::new(cache_ttl)),
            requests: RequestTable::new(),
            default_timeout,
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &CoordinatorSection) -> Self {
        Self {
            sweep_interval: config.sweep_interval(),
            ..Self::new(config.cache_ttl(), config.request_timeout())
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn lookup(&self, input: &str) -> Option<AnalysisResult> {
        self.cache.lookup(input).await
    }

    pub async fn store(&self, input: &str, result: AnalysisResult) {
        self.cache.store(input, result).await
    }

    pub async fn call_with_timeout<T, F, Fut>(
        &self,
        id: &str,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T, AgentError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        self.requests
            .call_with_timeout(id, timeout.unwrap_or(self.default_timeout), f)
            .await
    }

    pub async fn cancel(&self, id: &str) -> bool {
        self.requests.cancel(id).await
    }

    pub async fn cancel_all(&self) -> usize {
        self.requests.cancel_all().await
    }

    /// 启动缓存后台清理（间隔取自配置，默认 60 秒）
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.cache.spawn_sweeper(self.sweep_interval, shutdown)
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            entries: self.cache.len().await,
            active_requests: self.requests.active_count().await,
            hits: self.cache.hits(),
            misses: self.cache.misses(),
        }
    }
}

impl Default for RequestCoordinator {
    fn default() -> Self {
        Self::from_config(&CoordinatorSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CostEstimate, DroneCommand};

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let coordinator = RequestCoordinator::new(Duration::from_secs(300), Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let err = coordinator
            .call_with_timeout("a", None, |token| async move {
                token.cancelled().await;
                Ok::<_, AgentError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled { .. }));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test]
    async fn test_stats() {
        let coordinator = RequestCoordinator::default();
        let result = AnalysisResult::success(vec![DroneCommand::new("land")], vec![], CostEstimate::default());
        coordinator.store("land", result).await;
        assert!(coordinator.lookup("LAND").await.is_some());
        assert!(coordinator.lookup("takeoff").await.is_none());
        let stats = coordinator.stats().await;
        assert_eq!(
            stats,
            CoordinatorStats {
                entries: 1,
                active_requests: 0,
                hits: 1,
                misses: 1
            }
        );
    }
}
