//! 伴随进程的终端命令：每行一条，解析后交给 `Companion::execute`。

use crate::rotation::types::{EndReason, Provider};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub const HELP: &str = "\
可用命令：
  rotate [恢复时间]            结束当前会话（额度耗尽）并切换账号
  start <账号ID> <提供方>      用指定账号开始会话
  accept <账号ID>              确认改用备用提供方
  end [exhausted [恢复时间]]   结束当前会话
  pause | resume               暂停/继续会话计时显示
  status                       查看计时与账号概况
  help | quit
恢复时间：RFC 3339 时间，或相对时长 90m / 5h / 2d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rotate {
        scheduled_reset: Option<DateTime<Utc>>,
    },
    Start {
        account_id: String,
        provider: Provider,
    },
    Accept {
        account_id: String,
    },
    End {
        reason: EndReason,
        scheduled_reset: Option<DateTime<Utc>>,
    },
    Pause,
    Resume,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("未知命令: {0}，输入 help 查看可用命令")]
    Unknown(String),

    #[error("用法: {0}")]
    Usage(&'static str),

    #[error("无法解析恢复时间: {0}")]
    InvalidReset(String),

    #[error("{0}")]
    InvalidProvider(String),
}

impl Command {
    /// 空行返回 `Ok(None)`。相对恢复时间以 `now` 为基准。
    pub fn parse(line: &str, now: DateTime<Utc>) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let cmd = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("rotate", []) => Command::Rotate {
                scheduled_reset: None,
            },
            ("rotate", [reset]) => Command::Rotate {
                scheduled_reset: Some(parse_reset(reset, now)?),
            },
            ("rotate", _) => return Err(ParseError::Usage("rotate [恢复时间]")),

            ("start", [account_id, provider]) => Command::Start {
                account_id: account_id.to_string(),
                provider: provider.parse().map_err(ParseError::InvalidProvider)?,
            },
            ("start", _) => return Err(ParseError::Usage("start <账号ID> <提供方>")),

            ("accept", [account_id]) => Command::Accept {
                account_id: account_id.to_string(),
            },
            ("accept", _) => return Err(ParseError::Usage("accept <账号ID>")),

            ("end", []) => Command::End {
                reason: EndReason::Manual,
                scheduled_reset: None,
            },
            ("end", ["exhausted"]) => Command::End {
                reason: EndReason::QuotaExhausted,
                scheduled_reset: None,
            },
            ("end", ["exhausted", reset]) => Command::End {
                reason: EndReason::QuotaExhausted,
                scheduled_reset: Some(parse_reset(reset, now)?),
            },
            ("end", _) => return Err(ParseError::Usage("end [exhausted [恢复时间]]")),

            ("pause", []) => Command::Pause,
            ("resume", []) => Command::Resume,
            ("status", []) => Command::Status,
            ("help" | "?", _) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(ParseError::Unknown(line.trim().to_string())),
        };
        Ok(Some(cmd))
    }
}

/// RFC 3339 时间，或相对 `now` 的 `<n>m` / `<n>h` / `<n>d`。
pub fn parse_reset(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }

    let invalid = || ParseError::InvalidReset(s.to_string());
    let split = s.len().checked_sub(1).ok_or_else(invalid)?;
    let (num, unit) = s.split_at_checked(split).ok_or_else(invalid)?;
    let n: i64 = num.parse().map_err(|_| invalid())?;
    if n <= 0 {
        return Err(invalid());
    }
    let delta = match unit {
        "m" => Duration::try_minutes(n),
        "h" => Duration::try_hours(n),
        "d" => Duration::try_days(n),
        _ => None,
    }
    .ok_or_else(invalid)?;
    now.checked_add_signed(delta).ok_or_else(invalid)
}
