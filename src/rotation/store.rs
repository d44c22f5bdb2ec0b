use crate::rotation::selector::{self, Selection, SelectionReason};
use crate::rotation::types::{Account, AccountView, EndReason, MAX_OFFSET_MS, Provider, Session};
use crate::util::id;
use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

pub const STORE_FILE_NAME: &str = "tracker.json";
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("账号不存在")]
    AccountNotFound,

    #[error("该邮箱已登记: {0}")]
    DuplicateEmail(String),

    #[error("邮箱不能为空")]
    EmptyEmail,

    #[error("不能删除正在使用的账号")]
    AccountActive,

    #[error("{0} 额度已耗尽")]
    QuotaExhausted(Provider),

    #[error("已有进行中的会话，请先结束当前会话")]
    SessionConflict,

    #[error("offset_ms 超出范围，最多 30 天")]
    InvalidOffset,

    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// 账号与会话的持久化存储（单个 JSON 文件）。
///
/// 所有“读-改-写”都在同一把写锁内完成，并在持锁期间落盘：
/// 额度恢复检查与账号选择不会交错执行，也不会出现旧快照覆盖新快照。
#[derive(Debug)]
pub struct Store {
    file_path: PathBuf,
    state: RwLock<State>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    sessions: Vec<Session>,
}

/// 更新账号的可选字段；`name` 为空字符串表示清除显示名。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSession {
    pub session: Session,
    pub account: AccountView,
    /// 命中了同一账号/提供方的进行中会话，未新建。
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateRequest {
    #[serde(default = "default_rotate_reason")]
    pub reason: EndReason,
    #[serde(default)]
    pub scheduled_reset: Option<DateTime<Utc>>,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

impl Default for RotateRequest {
    fn default() -> Self {
        Self {
            reason: default_rotate_reason(),
            scheduled_reset: None,
            auto_start: default_auto_start(),
        }
    }
}

fn default_rotate_reason() -> EndReason {
    EndReason::QuotaExhausted
}

fn default_auto_start() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationReport {
    pub ended_session: Option<Session>,
    #[serde(flatten)]
    pub outcome: RotationOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RotationOutcome {
    /// 已自动用主力提供方开启新会话。
    Started {
        account: AccountView,
        provider: Provider,
        session: Session,
    },
    /// auto_start=false：只给出建议，不开启会话。
    Selected {
        account: AccountView,
        provider: Provider,
    },
    /// 只剩备用提供方可用，需要用户确认。
    NeedsChoice {
        account: AccountView,
        provider: Provider,
        next_primary_reset: Option<DateTime<Utc>>,
    },
    NoAccounts { reason: SelectionReason },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub provider: Option<Provider>,
}

impl Store {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::with_path(data_dir.as_ref().join(STORE_FILE_NAME))
    }

    pub fn with_path(file_path: PathBuf) -> Self {
        Self {
            file_path,
            state: RwLock::new(State::default()),
        }
    }

    pub async fn load(&self) -> anyhow::Result<()> {
        ensure_parent_dir(&self.file_path).await?;

        let data = match tokio::fs::read(&self.file_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.state.write().await = State::default();
                return Ok(());
            }
            Err(e) => return Err(e).context("读取 tracker.json 失败"),
        };

        let loaded: State = sonic_rs::from_slice(&data)
            .map_err(|e| anyhow!(e))
            .context("解析 tracker.json 失败")?;

        *self.state.write().await = loaded;
        Ok(())
    }

    // ------------------------------------------------------------------
    // 账号
    // ------------------------------------------------------------------

    /// 按登记顺序返回全部账号（即选择算法使用的列表顺序）。
    pub async fn accounts(&self) -> Vec<Account> {
        self.state.read().await.accounts.clone()
    }

    pub async fn get_account(&self, account_id: &str) -> Option<Account> {
        let state = self.state.read().await;
        state.accounts.iter().find(|a| a.id == account_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    pub async fn create_account(
        &self,
        email: &str,
        name: Option<String>,
    ) -> Result<Account, StoreError> {
        let email = normalize_email(email)?;
        let now = Utc::now();
        self.mutate(move |state| {
            if state.email_taken(&email, None) {
                return Err(StoreError::DuplicateEmail(email));
            }
            let account = Account::new(email, name, now);
            state.accounts.push(account.clone());
            Ok(account)
        })
        .await
    }

    pub async fn update_account(
        &self,
        account_id: &str,
        patch: AccountPatch,
    ) -> Result<Account, StoreError> {
        let email = patch.email.as_deref().map(normalize_email).transpose()?;
        self.mutate(|state| {
            if let Some(email) = &email
                && state.email_taken(email, Some(account_id))
            {
                return Err(StoreError::DuplicateEmail(email.clone()));
            }
            let account = state.account_mut(account_id)?;
            if let Some(name) = patch.name {
                let name = name.trim().to_string();
                account.name = if name.is_empty() { None } else { Some(name) };
            }
            if let Some(email) = email {
                account.email = email;
            }
            Ok(account.clone())
        })
        .await
    }

    /// 删除账号及其全部会话记录。正在使用的账号不可删除。
    pub async fn delete_account(&self, account_id: &str) -> Result<(), StoreError> {
        self.mutate(|state| {
            let idx = state
                .accounts
                .iter()
                .position(|a| a.id == account_id)
                .ok_or(StoreError::AccountNotFound)?;
            if state.accounts[idx].active {
                return Err(StoreError::AccountActive);
            }
            state.accounts.remove(idx);
            state.sessions.retain(|s| s.account_id != account_id);
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // 额度
    // ------------------------------------------------------------------

    pub async fn mark_exhausted(
        &self,
        account_id: &str,
        provider: Provider,
        scheduled_reset: Option<DateTime<Utc>>,
    ) -> Result<Account, StoreError> {
        let now = Utc::now();
        self.mutate(|state| {
            let account = state.account_mut(account_id)?;
            account
                .quotas
                .get_mut(provider)
                .mark_exhausted(now, scheduled_reset);
            Ok(account.clone())
        })
        .await
    }

    pub async fn mark_available(
        &self,
        account_id: &str,
        provider: Provider,
    ) -> Result<Account, StoreError> {
        self.mutate(|state| {
            let account = state.account_mut(account_id)?;
            account.quotas.get_mut(provider).mark_available();
            Ok(account.clone())
        })
        .await
    }

    /// 所有账号中该提供方最早的预计恢复时间。
    pub async fn next_reset(&self, provider: Provider) -> Option<DateTime<Utc>> {
        self.state.read().await.next_reset(provider)
    }

    /// 把所有已到恢复时间的耗尽额度恢复为可用，返回变更条数。
    pub async fn apply_pending_resets(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let count = self
            .mutate(|state| Ok(state.apply_pending_resets(now)))
            .await?;
        if count > 0 {
            tracing::info!(count, "到期额度已恢复");
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // 会话
    // ------------------------------------------------------------------

    pub async fn active_session(&self) -> Option<(Session, Account)> {
        let state = self.state.read().await;
        let session = state.sessions.iter().find(|s| s.is_active())?;
        let account = state
            .accounts
            .iter()
            .find(|a| a.id == session.account_id)?;
        Some((session.clone(), account.clone()))
    }

    /// 开启会话。对同一账号/提供方重复调用会返回已有会话而不是新建。
    pub async fn start_session(
        &self,
        account_id: &str,
        provider: Provider,
        offset_ms: i64,
    ) -> Result<StartedSession, StoreError> {
        if offset_ms > MAX_OFFSET_MS {
            return Err(StoreError::InvalidOffset);
        }
        let now = Utc::now();
        let started = self
            .mutate(|state| {
                state.apply_pending_resets(now);
                state.start_session(account_id, provider, offset_ms, now)
            })
            .await?;
        if !started.reused {
            tracing::info!(
                account = %started.account.account.email,
                provider = %provider,
                "会话已开始"
            );
        }
        Ok(started)
    }

    /// 结束进行中的会话；没有会话时返回 None。
    pub async fn end_session(
        &self,
        reason: EndReason,
        scheduled_reset: Option<DateTime<Utc>>,
    ) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        let ended = self
            .mutate(|state| Ok(state.end_session(reason, scheduled_reset, now)))
            .await?;
        if let Some(s) = &ended {
            tracing::info!(
                account_id = %s.account_id,
                provider = %s.provider,
                duration_secs = s.duration_secs.unwrap_or_default(),
                reason = ?reason,
                "会话已结束"
            );
        }
        Ok(ended)
    }

    /// 结束当前会话并选出下一个账号。备用提供方只作为建议返回，从不自动开启。
    pub async fn rotate(&self, req: RotateRequest) -> Result<RotationReport, StoreError> {
        let now = Utc::now();
        let report = self
            .mutate(|state| {
                let ended_session = state.end_session(req.reason, req.scheduled_reset, now);
                state.apply_pending_resets(now);

                let (account_id, provider) = match selector::select(&state.accounts) {
                    Selection::Primary(acc) => (acc.id.clone(), Provider::PRIMARY),
                    Selection::SecondaryOnly(acc) => {
                        let outcome = RotationOutcome::NeedsChoice {
                            account: AccountView::from(acc),
                            provider: Provider::SECONDARY,
                            next_primary_reset: state.next_reset(Provider::PRIMARY),
                        };
                        return Ok(RotationReport {
                            ended_session,
                            outcome,
                        });
                    }
                    other => {
                        return Ok(RotationReport {
                            ended_session,
                            outcome: RotationOutcome::NoAccounts {
                                reason: other.reason(),
                            },
                        });
                    }
                };

                let outcome = if req.auto_start {
                    let started = state.start_session(&account_id, provider, 0, now)?;
                    RotationOutcome::Started {
                        account: started.account,
                        provider,
                        session: started.session,
                    }
                } else {
                    let account = state.account_mut(&account_id)?;
                    RotationOutcome::Selected {
                        account: AccountView::from(&*account),
                        provider,
                    }
                };

                Ok(RotationReport {
                    ended_session,
                    outcome,
                })
            })
            .await?;

        match &report.outcome {
            RotationOutcome::Started { account, .. } => {
                tracing::info!(account = %account.account.email, "已轮换到下一个账号");
            }
            RotationOutcome::NeedsChoice { account, .. } => {
                tracing::info!(account = %account.account.email, "仅剩备用提供方可用，等待用户确认");
            }
            RotationOutcome::NoAccounts { reason } => {
                tracing::warn!(reason = ?reason, "没有可轮换的账号");
            }
            RotationOutcome::Selected { .. } => {}
        }
        Ok(report)
    }

    /// 会话历史：按开始时间倒序。
    pub async fn history(&self, query: &HistoryQuery) -> Vec<Session> {
        let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| {
                query
                    .account_id
                    .as_deref()
                    .is_none_or(|id| s.account_id == id)
                    && query.provider.is_none_or(|p| s.provider == p)
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit);
        sessions
    }

    /// 账号与会话的一致快照（用于统计）。
    pub async fn snapshot(&self) -> (Vec<Account>, Vec<Session>) {
        let state = self.state.read().await;
        (state.accounts.clone(), state.sessions.clone())
    }

    /// 在写锁内对状态副本执行修改；仅当状态确有变化时落盘并提交。
    async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut State) -> Result<T, StoreError>,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let out = f(&mut next)?;
        if next != *state {
            self.save_snapshot(&next).await?;
            *state = next;
        }
        Ok(out)
    }

    async fn save_snapshot(&self, state: &State) -> anyhow::Result<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data = sonic_rs::to_vec_pretty(state).context("序列化 tracker.json 失败")?;
        tokio::fs::write(&self.file_path, data)
            .await
            .context("写入 tracker.json 失败")
    }
}

impl State {
    fn account_mut(&mut self, account_id: &str) -> Result<&mut Account, StoreError> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or(StoreError::AccountNotFound)
    }

    fn email_taken(&self, email: &str, except_id: Option<&str>) -> bool {
        self.accounts
            .iter()
            .any(|a| a.email.eq_ignore_ascii_case(email) && Some(a.id.as_str()) != except_id)
    }

    fn next_reset(&self, provider: Provider) -> Option<DateTime<Utc>> {
        self.accounts
            .iter()
            .map(|a| a.quotas.get(provider))
            .filter(|q| !q.available)
            .filter_map(|q| q.scheduled_reset)
            .min()
    }

    fn apply_pending_resets(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for account in &mut self.accounts {
            for (_, quota) in account.quotas.iter_mut() {
                if quota.reset_due(now) {
                    quota.mark_available();
                    count += 1;
                }
            }
        }
        count
    }

    fn start_session(
        &mut self,
        account_id: &str,
        provider: Provider,
        offset_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<StartedSession, StoreError> {
        let account = self
            .accounts
            .iter()
            .find(|a| a.id == account_id)
            .ok_or(StoreError::AccountNotFound)?;

        if let Some(active) = self.sessions.iter().find(|s| s.is_active()) {
            if active.account_id == account_id && active.provider == provider {
                return Ok(StartedSession {
                    session: active.clone(),
                    account: AccountView::from(account),
                    reused: true,
                });
            }
            return Err(StoreError::SessionConflict);
        }

        if !account.is_available(provider) {
            return Err(StoreError::QuotaExhausted(provider));
        }

        let session = Session {
            id: id::session_id(),
            account_id: account_id.to_string(),
            provider,
            started_at: now,
            ended_at: None,
            offset_ms: offset_ms.max(0),
            duration_secs: None,
            end_reason: None,
        };
        self.sessions.push(session.clone());

        for a in &mut self.accounts {
            a.active = a.id == account_id;
        }
        let account = self.account_mut(account_id)?;

        Ok(StartedSession {
            session,
            account: AccountView::from(&*account),
            reused: false,
        })
    }

    fn end_session(
        &mut self,
        reason: EndReason,
        scheduled_reset: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        let session = self.sessions.iter_mut().find(|s| s.is_active())?;
        let duration_secs = session.elapsed_at(now).num_seconds().max(0);
        session.ended_at = Some(now);
        session.duration_secs = Some(duration_secs);
        session.end_reason = Some(reason);
        let ended = session.clone();

        if let Some(account) = self.accounts.iter_mut().find(|a| a.id == ended.account_id) {
            account.active = false;
            account.times_used = account.times_used.saturating_add(1);
            account.total_usage_secs += duration_secs;
            if reason == EndReason::QuotaExhausted {
                account
                    .quotas
                    .get_mut(ended.provider)
                    .mark_exhausted(now, scheduled_reset);
            }
        }

        Some(ended)
    }
}

fn normalize_email(email: &str) -> Result<String, StoreError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(StoreError::EmptyEmail);
    }
    Ok(email.to_string())
}

async fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir)
        .await
        .context("创建数据目录失败")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::types::Classification;
    use chrono::Duration;

    async fn temp_store() -> Store {
        let store = Store::new(id::scratch_dir("rotator-store"));
        store.load().await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_rejects_duplicate_and_empty_email() {
        let store = temp_store().await;
        let acc = store
            .create_account(" a@example.com ", Some("主号".to_string()))
            .await
            .unwrap();
        assert_eq!(acc.email, "a@example.com");
        assert_eq!(acc.classification(), Classification::Available);

        let dup = store.create_account("A@EXAMPLE.COM", None).await;
        assert!(matches!(dup, Err(StoreError::DuplicateEmail(_))));
        assert!(matches!(
            store.create_account("   ", None).await,
            Err(StoreError::EmptyEmail)
        ));
    }

    #[tokio::test]
    async fn out_of_range_offset_is_rejected_and_store_stays_usable() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();

        assert!(matches!(
            store.start_session(&a.id, Provider::Anthropic, i64::MAX).await,
            Err(StoreError::InvalidOffset)
        ));
        assert!(store.active_session().await.is_none());

        let started = store
            .start_session(&a.id, Provider::Anthropic, MAX_OFFSET_MS)
            .await
            .unwrap();
        assert_eq!(started.session.offset_ms, MAX_OFFSET_MS);

        let ended = store
            .end_session(EndReason::Manual, None)
            .await
            .unwrap()
            .unwrap();
        assert!(ended.duration_secs.unwrap() >= MAX_OFFSET_MS / 1000);
        assert!(store.active_session().await.is_none());
        store.delete_account(&a.id).await.unwrap();
    }

    #[tokio::test]
    async fn state_survives_reload_from_disk() {
        let dir = id::scratch_dir("rotator-reload");
        let store = Store::new(&dir);
        store.load().await.unwrap();
        let acc = store.create_account("a@example.com", None).await.unwrap();
        store
            .mark_exhausted(&acc.id, Provider::Gemini, None)
            .await
            .unwrap();

        let reopened = Store::new(&dir);
        reopened.load().await.unwrap();
        let loaded = reopened.get_account(&acc.id).await.unwrap();
        assert!(loaded.is_available(Provider::Anthropic));
        assert!(!loaded.is_available(Provider::Gemini));
    }

    #[tokio::test]
    async fn pending_reset_check_is_idempotent() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        let b = store.create_account("b@example.com", None).await.unwrap();
        let now = Utc::now();

        store
            .mark_exhausted(&a.id, Provider::Anthropic, Some(now - Duration::minutes(1)))
            .await
            .unwrap();
        store
            .mark_exhausted(&a.id, Provider::Gemini, Some(now))
            .await
            .unwrap();
        // 未到期与没有恢复时间的额度都不应被恢复。
        store
            .mark_exhausted(&b.id, Provider::Anthropic, Some(now + Duration::hours(1)))
            .await
            .unwrap();
        store
            .mark_exhausted(&b.id, Provider::Gemini, None)
            .await
            .unwrap();

        assert_eq!(store.apply_pending_resets(now).await.unwrap(), 2);
        assert_eq!(store.apply_pending_resets(now).await.unwrap(), 0);

        let a = store.get_account(&a.id).await.unwrap();
        assert!(a.is_available(Provider::Anthropic));
        assert!(a.quotas.anthropic.scheduled_reset.is_none());
        assert!(a.quotas.gemini.exhausted_at.is_none());

        let b = store.get_account(&b.id).await.unwrap();
        assert_eq!(b.classification(), Classification::Exhausted);
    }

    #[tokio::test]
    async fn next_reset_is_earliest_exhausted_quota() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        let b = store.create_account("b@example.com", None).await.unwrap();
        let now = Utc::now();
        assert_eq!(store.next_reset(Provider::Anthropic).await, None);

        store
            .mark_exhausted(&a.id, Provider::Anthropic, Some(now + Duration::hours(3)))
            .await
            .unwrap();
        store
            .mark_exhausted(&b.id, Provider::Anthropic, Some(now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(
            store.next_reset(Provider::Anthropic).await,
            Some(now + Duration::hours(1))
        );
        assert_eq!(store.next_reset(Provider::Gemini).await, None);
    }

    #[tokio::test]
    async fn start_session_reuses_existing_active_session() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        let b = store.create_account("b@example.com", None).await.unwrap();

        let first = store
            .start_session(&a.id, Provider::Anthropic, 0)
            .await
            .unwrap();
        assert!(!first.reused);
        assert!(first.account.account.active);

        let again = store
            .start_session(&a.id, Provider::Anthropic, 0)
            .await
            .unwrap();
        assert!(again.reused);
        assert_eq!(again.session.id, first.session.id);
        assert_eq!(store.history(&HistoryQuery::default()).await.len(), 1);

        assert!(matches!(
            store.start_session(&b.id, Provider::Anthropic, 0).await,
            Err(StoreError::SessionConflict)
        ));
    }

    #[tokio::test]
    async fn start_session_refuses_exhausted_quota() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        store
            .mark_exhausted(&a.id, Provider::Anthropic, None)
            .await
            .unwrap();
        assert!(matches!(
            store.start_session(&a.id, Provider::Anthropic, 0).await,
            Err(StoreError::QuotaExhausted(Provider::Anthropic))
        ));
        assert!(matches!(
            store.start_session("missing", Provider::Gemini, 0).await,
            Err(StoreError::AccountNotFound)
        ));
    }

    #[tokio::test]
    async fn end_session_updates_usage_and_marks_quota() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        store
            .start_session(&a.id, Provider::Anthropic, 120_000)
            .await
            .unwrap();

        let reset_at = Utc::now() + Duration::hours(5);
        let ended = store
            .end_session(EndReason::QuotaExhausted, Some(reset_at))
            .await
            .unwrap()
            .unwrap();
        assert!(ended.duration_secs.unwrap() >= 120);
        assert_eq!(ended.end_reason, Some(EndReason::QuotaExhausted));

        let acc = store.get_account(&a.id).await.unwrap();
        assert!(!acc.active);
        assert_eq!(acc.times_used, 1);
        assert!(acc.total_usage_secs >= 120);
        assert!(!acc.is_available(Provider::Anthropic));
        assert_eq!(acc.quotas.anthropic.scheduled_reset, Some(reset_at));

        assert!(store.active_session().await.is_none());
        assert!(
            store
                .end_session(EndReason::Manual, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn rotate_moves_to_next_primary_account() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        let b = store.create_account("b@example.com", None).await.unwrap();
        store
            .start_session(&a.id, Provider::Anthropic, 0)
            .await
            .unwrap();

        let report = store.rotate(RotateRequest::default()).await.unwrap();
        assert_eq!(report.ended_session.unwrap().account_id, a.id);
        match report.outcome {
            RotationOutcome::Started {
                account,
                provider,
                session,
            } => {
                assert_eq!(account.account.id, b.id);
                assert_eq!(provider, Provider::Anthropic);
                assert!(session.is_active());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let (session, account) = store.active_session().await.unwrap();
        assert_eq!(account.id, b.id);
        assert_eq!(session.provider, Provider::Anthropic);
    }

    #[tokio::test]
    async fn rotate_never_auto_starts_secondary() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        let reset_at = Utc::now() + Duration::hours(2);
        store
            .start_session(&a.id, Provider::Anthropic, 0)
            .await
            .unwrap();

        let report = store
            .rotate(RotateRequest {
                scheduled_reset: Some(reset_at),
                ..RotateRequest::default()
            })
            .await
            .unwrap();
        match report.outcome {
            RotationOutcome::NeedsChoice {
                account,
                provider,
                next_primary_reset,
            } => {
                assert_eq!(account.account.id, a.id);
                assert_eq!(provider, Provider::Gemini);
                assert_eq!(next_primary_reset, Some(reset_at));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.active_session().await.is_none());
    }

    #[tokio::test]
    async fn rotate_reports_no_accounts_and_all_exhausted() {
        let store = temp_store().await;
        let report = store.rotate(RotateRequest::default()).await.unwrap();
        assert!(report.ended_session.is_none());
        assert!(matches!(
            report.outcome,
            RotationOutcome::NoAccounts {
                reason: SelectionReason::NoAccounts
            }
        ));

        let a = store.create_account("a@example.com", None).await.unwrap();
        for p in Provider::ALL {
            store.mark_exhausted(&a.id, p, None).await.unwrap();
        }
        let report = store.rotate(RotateRequest::default()).await.unwrap();
        assert!(matches!(
            report.outcome,
            RotationOutcome::NoAccounts {
                reason: SelectionReason::AllExhausted
            }
        ));
    }

    #[tokio::test]
    async fn rotate_without_auto_start_only_suggests() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        let report = store
            .rotate(RotateRequest {
                auto_start: false,
                ..RotateRequest::default()
            })
            .await
            .unwrap();
        match report.outcome {
            RotationOutcome::Selected { account, provider } => {
                assert_eq!(account.account.id, a.id);
                assert_eq!(provider, Provider::Anthropic);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.active_session().await.is_none());
    }

    #[tokio::test]
    async fn rotate_applies_due_resets_before_selecting() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        store
            .mark_exhausted(
                &a.id,
                Provider::Anthropic,
                Some(Utc::now() - Duration::seconds(1)),
            )
            .await
            .unwrap();

        let report = store.rotate(RotateRequest::default()).await.unwrap();
        assert!(matches!(report.outcome, RotationOutcome::Started { .. }));
    }

    #[tokio::test]
    async fn delete_refuses_active_account_and_cascades_sessions() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        store
            .start_session(&a.id, Provider::Gemini, 0)
            .await
            .unwrap();
        assert!(matches!(
            store.delete_account(&a.id).await,
            Err(StoreError::AccountActive)
        ));

        store.end_session(EndReason::Manual, None).await.unwrap();
        store.delete_account(&a.id).await.unwrap();
        assert_eq!(store.count().await, 0);
        assert!(store.history(&HistoryQuery::default()).await.is_empty());
        assert!(matches!(
            store.delete_account(&a.id).await,
            Err(StoreError::AccountNotFound)
        ));
    }

    #[tokio::test]
    async fn update_checks_email_uniqueness_and_clears_name() {
        let store = temp_store().await;
        let a = store
            .create_account("a@example.com", Some("A".to_string()))
            .await
            .unwrap();
        store.create_account("b@example.com", None).await.unwrap();

        let dup = store
            .update_account(
                &a.id,
                AccountPatch {
                    email: Some("b@example.com".to_string()),
                    ..AccountPatch::default()
                },
            )
            .await;
        assert!(matches!(dup, Err(StoreError::DuplicateEmail(_))));

        let updated = store
            .update_account(
                &a.id,
                AccountPatch {
                    name: Some(String::new()),
                    email: Some("a2@example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, None);
        assert_eq!(updated.email, "a2@example.com");
        assert_eq!(updated.display_name(), "a2@example.com");
    }

    #[tokio::test]
    async fn history_filters_and_orders_newest_first() {
        let store = temp_store().await;
        let a = store.create_account("a@example.com", None).await.unwrap();
        for provider in [Provider::Anthropic, Provider::Gemini, Provider::Anthropic] {
            store.start_session(&a.id, provider, 0).await.unwrap();
            store.end_session(EndReason::Manual, None).await.unwrap();
        }

        let all = store.history(&HistoryQuery::default()).await;
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].started_at >= w[1].started_at));

        let gemini = store
            .history(&HistoryQuery {
                provider: Some(Provider::Gemini),
                ..HistoryQuery::default()
            })
            .await;
        assert_eq!(gemini.len(), 1);

        let limited = store
            .history(&HistoryQuery {
                limit: Some(2),
                account_id: Some(a.id.clone()),
                ..HistoryQuery::default()
            })
            .await;
        assert_eq!(limited.len(), 2);
    }
}
