use futures::future::{AbortHandle, abortable};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// 一个逻辑请求槽：新请求发出时取消上一个，只有最近一次发出的请求结果会被采用。
#[derive(Debug, Default)]
pub struct LatestRequest {
    generation: AtomicU64,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl LatestRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行 `fut`；若期间有更新的请求发出，返回 None（被取消不算错误）。
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let (fut, handle) = abortable(fut);
        let generation = {
            let mut slot = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(prev) = slot.replace(handle) {
                prev.abort();
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let out = fut.await.ok()?;
        // 已完成但在返回前被新请求取代，同样丢弃。
        (self.generation.load(Ordering::SeqCst) == generation).then_some(out)
    }
}
