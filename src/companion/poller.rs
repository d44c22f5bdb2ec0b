//! 后台轮询：额度恢复检查按固定间隔执行，也可由倒计时归零提前触发；
//! 账号概况按固定间隔刷新。

use crate::companion::api::ApiClient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub fn spawn_reset_poller<F>(
    api: ApiClient,
    interval: Duration,
    trigger: Arc<Notify>,
    on_reset: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(usize) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if let Some(count) = check_once(&api).await
                && count > 0
            {
                on_reset(count);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = trigger.notified() => {
                    tracing::debug!("倒计时结束，提前检查额度恢复");
                }
            }
        }
    })
}

/// 执行一次检查；失败只记 debug 日志，等下一轮重试。
pub async fn check_once(api: &ApiClient) -> Option<usize> {
    match api.check_resets().await {
        Ok(r) => Some(r.reset_count),
        Err(e) => {
            tracing::debug!("额度恢复检查失败，下轮重试: {e}");
            None
        }
    }
}

/// 定时刷新账号概况；错误处理由 `refresh` 自行负责。
pub fn spawn_stats_refresh<F, Fut>(interval: Duration, refresh: F) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            refresh().await;
            tokio::time::sleep(interval).await;
        }
    })
}
