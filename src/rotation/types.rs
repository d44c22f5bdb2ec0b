use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 受额度限制的外部服务。枚举顺序即优先级：主力在前，备用在后。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Gemini,
}

impl Provider {
    pub const PRIMARY: Provider = Provider::Anthropic;
    pub const SECONDARY: Provider = Provider::Gemini;

    /// 按优先级排列的全部提供方。
    pub const ALL: [Provider; 2] = [Provider::PRIMARY, Provider::SECONDARY];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    pub fn is_primary(self) -> bool {
        self == Provider::PRIMARY
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("无效的提供方: {other}")),
        }
    }
}

/// 额度状态机的两个状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaState {
    Available,
    Exhausted {
        scheduled_reset: Option<DateTime<Utc>>,
    },
}

/// 单个账号在某个提供方上的额度记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub available: bool,
    #[serde(default)]
    pub scheduled_reset: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exhausted_at: Option<DateTime<Utc>>,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            available: true,
            scheduled_reset: None,
            exhausted_at: None,
        }
    }
}

impl Quota {
    pub fn state(&self) -> QuotaState {
        if self.available {
            QuotaState::Available
        } else {
            QuotaState::Exhausted {
                scheduled_reset: self.scheduled_reset,
            }
        }
    }

    /// available → exhausted。已耗尽时再次标记只更新预计恢复时间。
    pub fn mark_exhausted(&mut self, now: DateTime<Utc>, scheduled_reset: Option<DateTime<Utc>>) {
        if self.available {
            self.exhausted_at = Some(now);
        }
        self.available = false;
        if scheduled_reset.is_some() {
            self.scheduled_reset = scheduled_reset;
        }
    }

    /// exhausted → available（手动或到期）。
    pub fn mark_available(&mut self) {
        self.available = true;
        self.scheduled_reset = None;
        self.exhausted_at = None;
    }

    /// 是否已到恢复时间。没有预计恢复时间的额度永远不会自动恢复。
    pub fn reset_due(&self, now: DateTime<Utc>) -> bool {
        !self.available && self.scheduled_reset.is_some_and(|rt| rt <= now)
    }
}

/// 每个提供方恰好一条额度记录。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    #[serde(default)]
    pub anthropic: Quota,
    #[serde(default)]
    pub gemini: Quota,
}

impl Quotas {
    pub fn get(&self, provider: Provider) -> &Quota {
        match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::Gemini => &self.gemini,
        }
    }

    pub fn get_mut(&mut self, provider: Provider) -> &mut Quota {
        match provider {
            Provider::Anthropic => &mut self.anthropic,
            Provider::Gemini => &mut self.gemini,
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Provider, &mut Quota)> {
        [
            (Provider::Anthropic, &mut self.anthropic),
            (Provider::Gemini, &mut self.gemini),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// 所有提供方均可用
    Available,
    /// 部分提供方耗尽
    Partial,
    /// 全部耗尽
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub times_used: u32,
    #[serde(default)]
    pub total_usage_secs: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub quotas: Quotas,
}

impl Account {
    pub fn new(email: impl Into<String>, name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: crate::util::id::account_id(),
            name: name.filter(|n| !n.trim().is_empty()),
            email: email.into(),
            active: false,
            times_used: 0,
            total_usage_secs: 0,
            created_at: now,
            quotas: Quotas::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(n) if !n.trim().is_empty() => n,
            _ => &self.email,
        }
    }

    pub fn is_available(&self, provider: Provider) -> bool {
        self.quotas.get(provider).available
    }

    pub fn classification(&self) -> Classification {
        let available = Provider::ALL
            .iter()
            .filter(|p| self.is_available(**p))
            .count();
        if available == Provider::ALL.len() {
            Classification::Available
        } else if available > 0 {
            Classification::Partial
        } else {
            Classification::Exhausted
        }
    }
}

/// 对外展示的账号：原始字段之外附带显示名与分类。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub account: Account,
    pub display_name: String,
    pub classification: Classification,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            display_name: account.display_name().to_string(),
            classification: account.classification(),
            account: account.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Manual,
    QuotaExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub account_id: String,
    pub provider: Provider,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// 续接会话时此前已累计的时长（毫秒）。
    #[serde(default)]
    pub offset_ms: i64,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub end_reason: Option<EndReason>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// 已用时长 = now - start + offset，只从时间戳推导，从不累加保存。
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        elapsed_with_offset(self.started_at, end, self.offset_ms)
    }
}

/// 续接会话允许携带的最大偏移：30 天。
pub const MAX_OFFSET_MS: i64 = 30 * 24 * 3600 * 1000;

/// `end - start + offset`，负偏移按 0 计，溢出时饱和而不是 panic。
pub fn elapsed_with_offset(start: DateTime<Utc>, end: DateTime<Utc>, offset_ms: i64) -> Duration {
    let offset = Duration::try_milliseconds(offset_ms.max(0)).unwrap_or(Duration::MAX);
    (end - start).checked_add(&offset).unwrap_or(Duration::MAX)
}
