use crate::rotation::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("参数错误: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("请求过于频繁，请稍后再试")]
    TooManyRequests,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// 统一的错误响应体：`{"error": {"message": "...", "type": "..."}}`。
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorBodyInner,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBodyInner {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::TooManyRequests => "rate_limited",
            AppError::Anyhow(_) => "internal",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::AccountNotFound => AppError::NotFound(message),
            StoreError::EmptyEmail
            | StoreError::QuotaExhausted(_)
            | StoreError::InvalidOffset => AppError::BadRequest(message),
            StoreError::DuplicateEmail(_)
            | StoreError::AccountActive
            | StoreError::SessionConflict => AppError::Conflict(message),
            StoreError::Persist(inner) => AppError::Anyhow(inner),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "请求处理失败");
        }

        let message = match &self {
            // 内部错误带上 anyhow 的上下文链，便于前端 toast 直接展示。
            AppError::Anyhow(e) => format!("内部错误: {e:#}"),
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: ErrorBodyInner {
                message,
                r#type: Some(self.kind().to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}
