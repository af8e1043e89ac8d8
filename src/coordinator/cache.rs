//! 分析结果缓存
//!
//! 键为归一化输入（去首尾空白、合并连续空白、小写）；条目超过 TTL 即失效，
//! 查询时惰性淘汰，另有后台定期清理。时间取自 tokio::time，测试可暂停时钟。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::command::AnalysisResult;

/// 归一化缓存键
pub fn normalize_input(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 单个缓存条目
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub normalized_input: String,
    pub result: AnalysisResult,
    pub created_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// TTL 结果缓存
pub struct ResultCache {
    entries: Mutex<HashMap<String, CachedEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 命中且未过期返回结果；过期条目在此处淘汰
    pub async fn lookup(&self, input: &str) -> Option<AnalysisResult> {
        let key = normalize_input(input);
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(&key) {
            Some(entry) if !entry.is_expired(now, self.ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "analysis cache hit");
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(&key);
            tracing::debug!(key = %key, "analysis cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn store(&self, input: &str, result: AnalysisResult) {
        let key = normalize_input(input);
        let entry = CachedEntry {
            normalized_input: key.clone(),
            result,
            created_at: Instant::now(),
        };
        self.entries.lock().await.insert(key, entry);
    }

    /// 清理所有过期条目，返回清理数量
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now, self.ttl));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// 启动后台定期清理；shutdown 触发后退出
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep().await;
                        if removed > 0 {
                            tracing::info!(removed, "swept expired analysis cache entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CostEstimate, DroneCommand};

    fn result() -> AnalysisResult {
        AnalysisResult::success(
            vec![DroneCommand::new("takeoff")],
            vec![],
            CostEstimate::default(),
        )
    }

    #[test]
    fn test_normalize_input() {
        assert_eq!(normalize_input("  Take  OFF\n then Land "), "take off then land");
    }

    #[tokio::test]
    async fn test_lookup_is_whitespace_and_case_insensitive() {
        let cache = ResultCache::new(Duration::from_secs(300));
        cache.store("Take off", result()).await;
        assert_eq!(cache.lookup("  take   OFF ").await, Some(result()));
        assert_eq!(cache.hits(), 1);
        assert!(cache.lookup("land").await.is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(300));
        cache.store("take off", result()).await;

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.lookup("take off").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.lookup("take off").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_overwrites_and_refreshes() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.store("a", result()).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.store("A", result()).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.lookup("a").await.is_some());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(300)));
        cache.store("take off", result()).await;
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(60), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(290)).await;
        assert_eq!(cache.len().await, 1);
        tokio::time::sleep(Duration::from_secs(80)).await;
        assert_eq!(cache.len().await, 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
