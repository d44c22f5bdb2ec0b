//! 终端伴随进程（`-watch`）：连接服务端，负责计时器展示、额度恢复轮询、
//! 本地会话记录，以及轮换/结束/确认备用提供方等前台操作（从标准输入读取命令）。

pub mod api;
pub mod command;
pub mod countdown;
pub mod latest;
pub mod local_state;
pub mod notice;
pub mod poller;
pub mod timers;

use crate::companion::api::{ApiClient, ClientError};
use crate::companion::command::Command;
use crate::companion::latest::LatestRequest;
use crate::companion::local_state::{LocalSession, LocalSessionStore};
use crate::companion::notice::{Notice, Notifier};
use crate::companion::timers::{TimerId, TimerManager};
use crate::config::Config;
use crate::rotation::selector::SelectionReason;
use crate::rotation::store::{RotateRequest, RotationOutcome, RotationReport, StartedSession};
use crate::rotation::summary::AccountSummary;
use crate::rotation::types::{EndReason, Provider, Session};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, Notify, watch};

const SESSION_TIMER_LABEL: &str = "当前会话";
const RESET_TIMER_LABEL: &str = "主力额度恢复";
const DEFAULT_STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

pub struct Companion {
    api: ApiClient,
    local: LocalSessionStore,
    notifier: Arc<dyn Notifier>,
    timers: Arc<Mutex<TimerManager>>,
    session_timer: Mutex<Option<TimerId>>,
    reset_timer: Mutex<Option<TimerId>>,
    reset_trigger: Arc<Notify>,
    paused: watch::Sender<bool>,
    /// 前台操作（轮换/开始/结束）共用一个槽：连续点击只采用最后一次。
    actions: LatestRequest,
    /// 后台刷新按资源各占一个槽，互不取消。
    session_refresh: LatestRequest,
    reset_refresh: LatestRequest,
    summary_refresh: LatestRequest,
    reset_check_interval: Duration,
    stats_refresh_interval: Duration,
}

impl Companion {
    pub fn new(cfg: &Config, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let mut companion = Self::with_parts(
            ApiClient::new(cfg)?,
            LocalSessionStore::new(&cfg.data_dir),
            notifier,
            cfg.reset_check_interval(),
        );
        companion.stats_refresh_interval = cfg.stats_refresh_interval();
        Ok(companion)
    }

    pub fn with_parts(
        api: ApiClient,
        local: LocalSessionStore,
        notifier: Arc<dyn Notifier>,
        reset_check_interval: Duration,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            api,
            local,
            notifier,
            timers: Arc::new(Mutex::new(TimerManager::new())),
            session_timer: Mutex::new(None),
            reset_timer: Mutex::new(None),
            reset_trigger: Arc::new(Notify::new()),
            paused,
            actions: LatestRequest::new(),
            session_refresh: LatestRequest::new(),
            reset_refresh: LatestRequest::new(),
            summary_refresh: LatestRequest::new(),
            reset_check_interval,
            stats_refresh_interval: DEFAULT_STATS_REFRESH_INTERVAL,
        }
    }

    /// 暂停/恢复会话正计时的刷新（倒计时不受影响）。
    pub fn set_paused(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    /// 启动后台任务，读取标准输入中的命令，直到 quit 或收到退出信号。
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.restore().await;
        self.schedule_reset_countdown().await;

        let driver = timers::spawn_driver(
            self.timers.clone(),
            self.paused.subscribe(),
            render_timers(),
        );

        let this = self.clone();
        let poller = poller::spawn_reset_poller(
            self.api.clone(),
            self.reset_check_interval,
            self.reset_trigger.clone(),
            move |count| {
                this.notifier
                    .notify(Notice::success(format!("{count} 个额度已恢复可用")));
                let this = this.clone();
                tokio::spawn(async move { this.schedule_reset_countdown().await });
            },
        );

        let this = self.clone();
        let stats = poller::spawn_stats_refresh(self.stats_refresh_interval, move || {
            let this = this.clone();
            async move {
                if let Some(summary) = this.refresh_summary().await {
                    tracing::info!("{}", format_summary(&summary));
                }
            }
        });

        tracing::info!("伴随进程已启动，输入 help 查看命令，按 Ctrl+C 退出");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("标准输入已关闭，仅保留后台任务");
                    let _ = tokio::signal::ctrl_c().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!("读取命令失败: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    break;
                }
            };

            match Command::parse(&line, Utc::now()) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => break,
                // 命令在独立任务中执行：新命令可以取代尚未完成的旧命令。
                Ok(Some(cmd)) => {
                    let this = self.clone();
                    tokio::spawn(async move { this.execute(cmd).await });
                }
                Err(e) => self.notifier.notify(Notice::warning(e.to_string())),
            }
        }

        driver.abort();
        poller.abort();
        stats.abort();
        Ok(())
    }

    pub async fn execute(&self, cmd: Command) {
        match cmd {
            Command::Rotate { scheduled_reset } => {
                self.rotate(scheduled_reset).await;
            }
            Command::Start {
                account_id,
                provider,
            } => {
                self.start(&account_id, provider).await;
            }
            Command::Accept { account_id } => {
                self.accept_secondary(&account_id).await;
            }
            Command::End {
                reason,
                scheduled_reset,
            } => {
                self.end_session(reason, scheduled_reset).await;
            }
            Command::Pause => {
                self.set_paused(true);
                self.notifier.notify(Notice::info("会话计时显示已暂停"));
            }
            Command::Resume => {
                self.set_paused(false);
                self.notifier.notify(Notice::info("会话计时显示已继续"));
            }
            Command::Status => {
                for line in self.status().await {
                    self.notifier.notify(Notice::info(line));
                }
            }
            Command::Help => self.notifier.notify(Notice::info(command::HELP)),
            Command::Quit => {}
        }
    }

    /// 当前计时与账号概况，每项一行。
    pub async fn status(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.session_display().await {
            Some(d) => lines.push(format!("{SESSION_TIMER_LABEL} {d}")),
            None => lines.push("当前没有进行中的会话".to_string()),
        }
        if let Some(d) = self.reset_countdown_display().await {
            lines.push(format!("{RESET_TIMER_LABEL} {d}"));
        }
        if let Some(summary) = self.refresh_summary().await {
            lines.push(format_summary(&summary));
        }
        lines
    }

    /// 拉取账号概况；失败只记 debug 日志。
    pub async fn refresh_summary(&self) -> Option<AccountSummary> {
        match self.summary_refresh.run(self.api.summary()).await? {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::debug!("刷新账号概况失败: {e}");
                None
            }
        }
    }

    /// 用服务端状态校准本地记录；服务端不可达时退回本地记录继续计时。
    pub async fn restore(&self) -> Option<LocalSession> {
        let local = match self.local.read().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("读取本地会话失败: {e:#}");
                None
            }
        };

        match self.session_refresh.run(self.api.active_session()).await {
            Some(Ok(active)) => match (active.session, active.account) {
                (Some(session), Some(account)) => {
                    let restored = self.track_session(&session).await;
                    tracing::info!(account = %account.display_name, "已恢复进行中的会话");
                    restored
                }
                _ => {
                    if local.is_some() {
                        tracing::info!("服务端已无进行中的会话，清除本地记录");
                    }
                    self.untrack_session().await;
                    None
                }
            },
            Some(Err(e)) => {
                tracing::debug!("获取服务端会话失败，使用本地记录: {e}");
                if let Some(l) = &local {
                    self.start_session_timer(l.started_at, l.offset_ms).await;
                }
                local
            }
            None => local,
        }
    }

    /// 结束当前会话（额度耗尽）并轮换到下一个账号。
    pub async fn rotate(&self, scheduled_reset: Option<DateTime<Utc>>) -> Option<RotationReport> {
        let req = RotateRequest {
            scheduled_reset,
            ..RotateRequest::default()
        };
        let report = self.foreground("轮换", self.api.rotate(&req)).await?;

        if report.ended_session.is_some() {
            self.untrack_session().await;
        }

        match &report.outcome {
            RotationOutcome::Started {
                account, session, ..
            } => {
                self.track_session(session).await;
                self.notifier.notify(Notice::success(format!(
                    "已切换到 {}（{}）",
                    account.display_name, session.provider
                )));
            }
            RotationOutcome::Selected { account, provider } => {
                self.notifier.notify(Notice::info(format!(
                    "建议使用 {}（{provider}）",
                    account.display_name
                )));
            }
            RotationOutcome::NeedsChoice {
                account,
                provider,
                next_primary_reset,
            } => {
                let when = next_primary_reset
                    .map(|t| format!("，{} 预计 {t} 恢复", Provider::PRIMARY))
                    .unwrap_or_default();
                self.notifier.notify(Notice::warning(format!(
                    "{} 额度已全部耗尽{when}。可改用 {}（{provider}），需要确认",
                    Provider::PRIMARY,
                    account.display_name
                )));
            }
            RotationOutcome::NoAccounts { reason } => {
                let message = match reason {
                    SelectionReason::NoAccounts => "尚未登记任何账号",
                    _ => "所有账号额度均已耗尽",
                };
                self.notifier.notify(Notice::warning(message));
            }
        }

        self.schedule_reset_countdown().await;
        Some(report)
    }

    /// 用户确认后，用备用提供方开启会话。
    pub async fn accept_secondary(&self, account_id: &str) -> Option<StartedSession> {
        self.start(account_id, Provider::SECONDARY).await
    }

    pub async fn start(&self, account_id: &str, provider: Provider) -> Option<StartedSession> {
        let started = self
            .foreground("开始会话", self.api.start_session(account_id, provider, 0))
            .await?;
        self.track_session(&started.session).await;
        if !started.reused {
            self.notifier.notify(Notice::success(format!(
                "已开始使用 {}（{provider}）",
                started.account.display_name
            )));
        }
        Some(started)
    }

    pub async fn end_session(
        &self,
        reason: EndReason,
        scheduled_reset: Option<DateTime<Utc>>,
    ) -> Option<Session> {
        let ended = self
            .foreground("结束会话", self.api.end_session(reason, scheduled_reset))
            .await?;
        self.untrack_session().await;
        self.notifier.notify(Notice::info(format!(
            "会话已结束，用时 {}",
            countdown::format_hms(ended.session.duration_secs.unwrap_or_default() * 1000)
        )));
        self.schedule_reset_countdown().await;
        Some(ended.session)
    }

    pub async fn local_session(&self) -> Option<LocalSession> {
        self.local.read().await.ok().flatten()
    }

    pub async fn session_display(&self) -> Option<String> {
        let id = (*self.session_timer.lock().await)?;
        self.timers.lock().await.display(id).map(str::to_string)
    }

    pub async fn reset_countdown_display(&self) -> Option<String> {
        let id = (*self.reset_timer.lock().await)?;
        self.timers.lock().await.display(id).map(str::to_string)
    }

    /// 前台操作：被新操作取代时静默返回 None；失败时发出提示。
    async fn foreground<T, F>(&self, action: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match self.actions.run(fut).await? {
            Ok(v) => Some(v),
            Err(e) => {
                self.notifier.notify(Notice::from_error(action, &e));
                None
            }
        }
    }

    async fn track_session(&self, session: &Session) -> Option<LocalSession> {
        let local = LocalSession {
            account_id: session.account_id.clone(),
            provider: session.provider,
            started_at: session.started_at,
            offset_ms: session.offset_ms,
            saved_at: Utc::now(),
        };
        if let Err(e) = self.local.write(&local).await {
            tracing::warn!("保存本地会话失败: {e:#}");
        }
        self.start_session_timer(session.started_at, session.offset_ms)
            .await;
        Some(local)
    }

    async fn untrack_session(&self) {
        if let Err(e) = self.local.clear().await {
            tracing::warn!("清除本地会话失败: {e:#}");
        }
        if let Some(id) = self.session_timer.lock().await.take() {
            self.timers.lock().await.stop(id);
        }
    }

    async fn start_session_timer(&self, started_at: DateTime<Utc>, offset_ms: i64) {
        let mut slot = self.session_timer.lock().await;
        let mut timers = self.timers.lock().await;
        if let Some(old) = slot.take() {
            timers.stop(old);
        }
        *slot = Some(timers.start_elapsed(SESSION_TIMER_LABEL, started_at, offset_ms, Utc::now()));
    }

    /// 按主力提供方最早的恢复时间重新安排倒计时；归零时提前触发一次恢复检查。
    async fn schedule_reset_countdown(&self) {
        let next = match self
            .reset_refresh
            .run(self.api.next_reset(Provider::PRIMARY))
            .await
        {
            Some(Ok(v)) => v.next_reset,
            Some(Err(e)) => {
                tracing::debug!("获取恢复时间失败: {e}");
                return;
            }
            None => return,
        };

        let mut slot = self.reset_timer.lock().await;
        let mut timers = self.timers.lock().await;
        if let Some(old) = slot.take() {
            timers.stop(old);
        }
        if let Some(target) = next {
            let trigger = self.reset_trigger.clone();
            *slot = Some(timers.start_countdown(
                RESET_TIMER_LABEL,
                target,
                Utc::now(),
                move || trigger.notify_one(),
            ));
        }
    }
}

fn format_summary(s: &AccountSummary) -> String {
    let limited = s
        .limited
        .iter()
        .map(|(p, n)| format!("{p} 受限 {n}"))
        .collect::<Vec<_>>()
        .join("，");
    format!(
        "账号 {}：可用 {} / 部分可用 {} / 耗尽 {}（{limited}），累计 {} 小时",
        s.total, s.available, s.partial, s.exhausted, s.total_hours
    )
}

/// 终端展示：每分钟整点输出一次 info，其余秒数只在 debug 下可见。
fn render_timers() -> impl Fn(&[(String, String)]) + Send + 'static {
    move |lines| {
        let text = lines
            .iter()
            .map(|(label, display)| format!("{label} {display}"))
            .collect::<Vec<_>>()
            .join(" | ");
        if lines.iter().any(|(_, d)| d.ends_with(":00")) {
            tracing::info!("{text}");
        } else {
            tracing::debug!("{text}");
        }
    }
}
