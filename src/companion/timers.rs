//! 终端计时器：倒计时（到点触发一次回调后注销）与正计时（会话已用时长）。
//!
//! `TimerManager` 由伴随进程持有，不存在全局注册表；暂停状态作为 `tick`
//! 的显式参数传入。

use crate::companion::countdown::format_hms;
use crate::rotation::types::elapsed_with_offset;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};

pub type TimerId = u64;

type Callback = Box<dyn FnOnce() + Send>;

enum TimerKind {
    Countdown {
        target: DateTime<Utc>,
        on_complete: Option<Callback>,
    },
    Elapsed {
        started_at: DateTime<Utc>,
        offset_ms: i64,
    },
}

struct Timer {
    label: String,
    kind: TimerKind,
    display: String,
}

impl Timer {
    fn render(&mut self, now: DateTime<Utc>, paused: bool) {
        match &self.kind {
            TimerKind::Countdown { target, .. } => {
                self.display = format_hms((*target - now).num_milliseconds());
            }
            TimerKind::Elapsed { .. } if paused => {}
            TimerKind::Elapsed {
                started_at,
                offset_ms,
            } => {
                let elapsed = elapsed_with_offset(*started_at, now, *offset_ms);
                self.display = format_hms(elapsed.num_milliseconds());
            }
        }
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.kind, TimerKind::Countdown { target, .. } if target <= now)
    }
}

#[derive(Default)]
pub struct TimerManager {
    next_id: TimerId,
    timers: BTreeMap<TimerId, Timer>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_countdown(
        &mut self,
        label: impl Into<String>,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> TimerId {
        self.insert(
            label.into(),
            TimerKind::Countdown {
                target,
                on_complete: Some(Box::new(on_complete)),
            },
            now,
        )
    }

    pub fn start_elapsed(
        &mut self,
        label: impl Into<String>,
        started_at: DateTime<Utc>,
        offset_ms: i64,
        now: DateTime<Utc>,
    ) -> TimerId {
        self.insert(
            label.into(),
            TimerKind::Elapsed {
                started_at,
                offset_ms,
            },
            now,
        )
    }

    pub fn stop(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn display(&self, id: TimerId) -> Option<&str> {
        self.timers.get(&id).map(|t| t.display.as_str())
    }

    /// 推进一秒：刷新显示，触发并注销到点的倒计时。返回 (标签, 显示) 列表。
    pub fn tick(&mut self, now: DateTime<Utc>, paused: bool) -> Vec<(String, String)> {
        let mut lines = Vec::with_capacity(self.timers.len());
        let mut expired = Vec::new();

        for (id, timer) in self.timers.iter_mut() {
            timer.render(now, paused);
            lines.push((timer.label.clone(), timer.display.clone()));
            if timer.expired(now) {
                expired.push(*id);
            }
        }

        for id in expired {
            if let Some(Timer {
                kind:
                    TimerKind::Countdown {
                        on_complete: Some(cb),
                        ..
                    },
                ..
            }) = self.timers.remove(&id)
            {
                cb();
            }
        }

        lines
    }

    fn insert(&mut self, label: String, kind: TimerKind, now: DateTime<Utc>) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        let mut timer = Timer {
            label,
            kind,
            display: String::new(),
        };
        timer.render(now, false);
        self.timers.insert(id, timer);
        id
    }
}

/// 每秒驱动一次 `tick`，并把结果交给 `render`。
pub fn spawn_driver<R>(
    timers: Arc<Mutex<TimerManager>>,
    paused: watch::Receiver<bool>,
    render: R,
) -> tokio::task::JoinHandle<()>
where
    R: Fn(&[(String, String)]) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let is_paused = *paused.borrow();
            let lines = timers.lock().await.tick(Utc::now(), is_paused);
            if !lines.is_empty() {
                render(&lines);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn countdown_fires_once_then_deregisters() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut mgr = TimerManager::new();
        let f = fired.clone();
        let id = mgr.start_countdown("reset", t(3), t(0), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(mgr.display(id), Some("00:00:03"));

        mgr.tick(t(1), false);
        assert_eq!(mgr.display(id), Some("00:00:02"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let lines = mgr.tick(t(5), false);
        assert_eq!(lines, vec![("reset".to_string(), "00:00:00".to_string())]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(mgr.display(id).is_none());

        mgr.tick(t(6), false);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn elapsed_is_suppressed_while_paused_and_resumes_from_wall_clock() {
        let mut mgr = TimerManager::new();
        let id = mgr.start_elapsed("session", t(0), 60_000, t(0));
        assert_eq!(mgr.display(id), Some("00:01:00"));

        mgr.tick(t(10), true);
        assert_eq!(mgr.display(id), Some("00:01:00"));

        mgr.tick(t(30), false);
        assert_eq!(mgr.display(id), Some("00:01:30"));
    }

    #[test]
    fn countdown_keeps_running_while_paused() {
        let mut mgr = TimerManager::new();
        let id = mgr.start_countdown("reset", t(10), t(0), || {});
        mgr.tick(t(4), true);
        assert_eq!(mgr.display(id), Some("00:00:06"));
    }

    #[test]
    fn stop_removes_without_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut mgr = TimerManager::new();
        let f = fired.clone();
        let id = mgr.start_countdown("reset", t(1), t(0), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(mgr.stop(id));
        assert!(!mgr.stop(id));
        assert!(mgr.tick(t(5), false).is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn huge_offset_saturates_instead_of_overflowing() {
        let mut mgr = TimerManager::new();
        let id = mgr.start_elapsed("session", t(0), i64::MAX, t(0));
        mgr.tick(t(10), false);
        assert_eq!(
            mgr.display(id),
            Some(format_hms(chrono::Duration::MAX.num_milliseconds()).as_str())
        );
    }
}
