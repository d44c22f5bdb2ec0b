use crate::rotation::types::{Account, Classification, Provider, Session};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 某个提供方上已完成会话的累计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub sessions: u32,
    pub hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MostUsed {
    Provider(Provider),
    Tie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub total: usize,
    pub available: usize,
    pub partial: usize,
    pub exhausted: usize,
    /// 各提供方处于耗尽状态的账号数（与上面的分类相互独立）。
    pub limited: BTreeMap<Provider, usize>,
    pub usage: BTreeMap<Provider, ProviderUsage>,
    /// 没有任何已完成会话时为 None。
    pub most_used: Option<MostUsed>,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_secs: i64,
    pub total_hours: f64,
    pub avg_duration_secs: f64,
    pub by_provider: BTreeMap<Provider, ProviderUsage>,
}

pub fn summarize(accounts: &[Account], sessions: &[Session]) -> AccountSummary {
    let mut available = 0;
    let mut partial = 0;
    let mut exhausted = 0;
    let mut limited: BTreeMap<Provider, usize> = Provider::ALL.iter().map(|p| (*p, 0)).collect();

    for account in accounts {
        match account.classification() {
            Classification::Available => available += 1,
            Classification::Partial => partial += 1,
            Classification::Exhausted => exhausted += 1,
        }
        for p in Provider::ALL {
            if !account.is_available(p)
                && let Some(n) = limited.get_mut(&p)
            {
                *n += 1;
            }
        }
    }

    // 只统计仍存在的账号的会话。
    let owned = sessions
        .iter()
        .filter(|s| accounts.iter().any(|a| a.id == s.account_id));
    let (usage, total_secs) = usage_by_provider(owned);

    AccountSummary {
        total: accounts.len(),
        available,
        partial,
        exhausted,
        limited,
        most_used: most_used(&usage),
        usage,
        total_hours: hours(total_secs),
    }
}

pub fn session_stats(sessions: &[Session]) -> SessionStats {
    let completed: Vec<&Session> = sessions.iter().filter(|s| !s.is_active()).collect();
    let (by_provider, total_secs) = usage_by_provider(completed.iter().copied());

    let avg = if completed.is_empty() {
        0.0
    } else {
        round2(total_secs as f64 / completed.len() as f64)
    };

    SessionStats {
        total_sessions: completed.len(),
        total_secs,
        total_hours: hours(total_secs),
        avg_duration_secs: avg,
        by_provider,
    }
}

fn usage_by_provider<'a>(
    sessions: impl Iterator<Item = &'a Session>,
) -> (BTreeMap<Provider, ProviderUsage>, i64) {
    let mut secs: BTreeMap<Provider, (u32, i64)> =
        Provider::ALL.iter().map(|p| (*p, (0, 0))).collect();
    let mut total = 0i64;

    for s in sessions {
        let Some(d) = s.duration_secs else {
            continue;
        };
        let entry = secs.entry(s.provider).or_default();
        entry.0 += 1;
        entry.1 += d;
        total += d;
    }

    let usage = secs
        .into_iter()
        .map(|(p, (n, d))| {
            (
                p,
                ProviderUsage {
                    sessions: n,
                    hours: hours(d),
                },
            )
        })
        .collect();
    (usage, total)
}

fn most_used(usage: &BTreeMap<Provider, ProviderUsage>) -> Option<MostUsed> {
    let top = usage.values().map(|u| u.sessions).max().unwrap_or(0);
    if top == 0 {
        return None;
    }
    let mut leaders = usage.iter().filter(|(_, u)| u.sessions == top);
    match (leaders.next(), leaders.next()) {
        (Some((p, _)), None) => Some(MostUsed::Provider(*p)),
        _ => Some(MostUsed::Tie),
    }
}

fn hours(secs: i64) -> f64 {
    round2(secs as f64 / 3600.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
