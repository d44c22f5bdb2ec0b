//! 选择算法：固定优先级 + 列表顺序。
//!
//! 先在全部账号里找主力提供方仍可用的第一个账号；找不到才退到备用提供方。
//! 同级候选只按输入顺序决定，不做任何二次排序。结果为 `SecondaryOnly` 时，
//! 调用方必须先征得用户确认，绝不能自动用备用提供方开启会话。

use crate::rotation::types::{Account, Provider};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    PrimaryAvailable,
    SecondaryOnly,
    NoAccounts,
    AllExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    Primary(&'a Account),
    SecondaryOnly(&'a Account),
    NoAccounts,
    AllExhausted,
}

impl<'a> Selection<'a> {
    pub fn reason(&self) -> SelectionReason {
        match self {
            Selection::Primary(_) => SelectionReason::PrimaryAvailable,
            Selection::SecondaryOnly(_) => SelectionReason::SecondaryOnly,
            Selection::NoAccounts => SelectionReason::NoAccounts,
            Selection::AllExhausted => SelectionReason::AllExhausted,
        }
    }

    pub fn account(&self) -> Option<&'a Account> {
        match *self {
            Selection::Primary(a) | Selection::SecondaryOnly(a) => Some(a),
            Selection::NoAccounts | Selection::AllExhausted => None,
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            Selection::Primary(_) => Some(Provider::PRIMARY),
            Selection::SecondaryOnly(_) => Some(Provider::SECONDARY),
            Selection::NoAccounts | Selection::AllExhausted => None,
        }
    }

    /// 仅剩备用提供方：需要用户明确选择后才能开始会话。
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Selection::SecondaryOnly(_))
    }
}

/// 从账号列表中选出下一个要使用的账号/提供方。纯函数，无副作用。
pub fn select(accounts: &[Account]) -> Selection<'_> {
    if accounts.is_empty() {
        return Selection::NoAccounts;
    }

    if let Some(acc) = first_available(accounts, Provider::PRIMARY) {
        return Selection::Primary(acc);
    }
    if let Some(acc) = first_available(accounts, Provider::SECONDARY) {
        return Selection::SecondaryOnly(acc);
    }

    Selection::AllExhausted
}

#[inline]
fn first_available(accounts: &[Account], provider: Provider) -> Option<&Account> {
    accounts.iter().find(|a| a.is_available(provider))
}
