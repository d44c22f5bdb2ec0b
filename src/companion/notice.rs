use crate::companion::api::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
    /// 需要重新登录，与普通错误区分展示。
    SessionExpired,
}

/// 面向用户的短暂提示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Warning, message)
    }

    pub fn from_error(action: &str, err: &ClientError) -> Self {
        match err {
            ClientError::SessionExpired => Self::new(NoticeKind::SessionExpired, err.to_string()),
            other => Self::new(NoticeKind::Error, format!("{action}失败: {other}")),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// 把提示写入日志（终端伴随进程的默认展示方式）。
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Info | NoticeKind::Success => tracing::info!("{}", notice.message),
            NoticeKind::Warning => tracing::warn!("{}", notice.message),
            NoticeKind::Error => tracing::error!("{}", notice.message),
            NoticeKind::SessionExpired => tracing::error!("[会话过期] {}", notice.message),
        }
    }
}
