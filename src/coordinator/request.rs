//! 在途请求表：超时、取消与同 id 顶替
//!
//! 每个 id 至多一个在途请求；新请求先取消旧请求再登记。结算（成功 / 失败 / 取消 / 调用方丢弃 future）
//! 由 [`SettleGuard`] 在 Drop 时完成，只有登记仍属于本次调用才移除，保证簿记恰好清理一次。
//! 表只做簿记，锁从不跨 await 持有，因此用同步 Mutex，Drop 中也能直接加锁。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, CancelReason};

/// 在途请求：取消令牌 + 截止计时器
struct ActiveRequest {
    generation: u64,
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    deadline: JoinHandle<()>,
    started_at: Instant,
}

impl ActiveRequest {
    /// 取消原因先到先得：超时计时器与显式取消竞争时只记录第一个
    fn cancel(self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
        self.deadline.abort();
    }
}

/// 按 id 管理在途请求
#[derive(Default)]
pub struct RequestTable {
    active: Mutex<HashMap<String, ActiveRequest>>,
    next_generation: AtomicU64,
}

/// 离开作用域即结算本次调用，覆盖 future 被提前丢弃的情况
struct SettleGuard<'a> {
    table: &'a RequestTable,
    id: &'a str,
    generation: u64,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.table.settle(self.id, self.generation);
    }
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, ActiveRequest>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在超时与取消约束下执行 `f`
    ///
    /// 超时、被顶替与显式取消都以 [`AgentError::Cancelled`] 返回，与 `f` 自身的错误区分开。
    pub async fn call_with_timeout<T, F, Fut>(
        &self,
        id: &str,
        timeout: Duration,
        f: F,
    ) -> Result<T, AgentError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());

        let deadline = {
            let token = token.clone();
            let reason = Arc::clone(&reason);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = reason.set(CancelReason::Timeout);
                token.cancel();
            })
        };

        let request = ActiveRequest {
            generation,
            token: token.clone(),
            reason: Arc::clone(&reason),
            deadline,
            started_at: Instant::now(),
        };
        let previous = self.table().insert(id.to_string(), request);
        if let Some(previous) = previous {
            tracing::info!(id, "superseding in-flight request");
            previous.cancel(CancelReason::Superseded);
        }
        let _settle = SettleGuard {
            table: self,
            id,
            generation,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let reason = reason.get().copied().unwrap_or(CancelReason::Explicit);
                tracing::warn!(id, %reason, "request cancelled");
                Err(AgentError::Cancelled { id: id.to_string(), reason })
            }
            result = f(token.clone()) => result,
        }
    }

    fn settle(&self, id: &str, generation: u64) {
        let mut active = self.table();
        if active.get(id).map(|r| r.generation) == Some(generation) {
            if let Some(request) = active.remove(id) {
                request.deadline.abort();
                tracing::debug!(
                    id,
                    elapsed_ms = request.started_at.elapsed().as_millis() as u64,
                    "request settled"
                );
            }
        }
    }

    /// 显式取消；id 不存在时返回 false
    pub async fn cancel(&self, id: &str) -> bool {
        let request = self.table().remove(id);
        match request {
            Some(request) => {
                request.cancel(CancelReason::Explicit);
                true
            }
            None => false,
        }
    }

    /// 取消全部在途请求，返回取消数量
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<ActiveRequest> = self.table().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for request in drained {
            request.cancel(CancelReason::Explicit);
        }
        count
    }

    pub async fn active_count(&self) -> usize {
        self.table().len()
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.table().contains_key(id)
    }
}
