use crate::config::Config;
use crate::error::ErrorBody;
use crate::gateway::quotas::{NextReset, ResetCheck};
use crate::gateway::sessions::{ActiveSession, EndedSession};
use crate::rotation::store::{RotateRequest, RotationReport, StartedSession};
use crate::rotation::summary::AccountSummary;
use crate::rotation::types::{EndReason, Provider};
use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// 响应不是 JSON（通常是被登录页/代理页面替换），视为会话过期。
    #[error("会话已过期，请重新登录")]
    SessionExpired,

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("网络请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("响应解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 服务端 `/api` 的 HTTP 客户端。
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        Self::with_base_url(&cfg.server_url, cfg.timeout())
    }

    pub fn with_base_url(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder.build().context("创建 HTTP 客户端失败")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn check_resets(&self) -> Result<ResetCheck, ClientError> {
        self.send(self.http.post(self.url("/api/quotas/check-resets")))
            .await
    }

    pub async fn next_reset(&self, provider: Provider) -> Result<NextReset, ClientError> {
        let path = format!("/api/quotas/next-reset/{provider}");
        self.send(self.http.get(self.url(&path))).await
    }

    pub async fn active_session(&self) -> Result<ActiveSession, ClientError> {
        self.send(self.http.get(self.url("/api/sessions/active")))
            .await
    }

    pub async fn start_session(
        &self,
        account_id: &str,
        provider: Provider,
        offset_ms: i64,
    ) -> Result<StartedSession, ClientError> {
        let body = serde_json::json!({
            "account_id": account_id,
            "provider": provider,
            "offset_ms": offset_ms,
        });
        self.send(self.http.post(self.url("/api/sessions/start")).json(&body))
            .await
    }

    pub async fn end_session(
        &self,
        reason: EndReason,
        scheduled_reset: Option<DateTime<Utc>>,
    ) -> Result<EndedSession, ClientError> {
        let body = serde_json::json!({
            "reason": reason,
            "scheduled_reset": scheduled_reset,
        });
        self.send(self.http.post(self.url("/api/sessions/end")).json(&body))
            .await
    }

    pub async fn rotate(&self, req: &RotateRequest) -> Result<RotationReport, ClientError> {
        self.send(self.http.post(self.url("/api/sessions/rotate")).json(req))
            .await
    }

    pub async fn summary(&self) -> Result<AccountSummary, ClientError> {
        self.send(self.http.get(self.url("/api/accounts/summary")))
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.trim_start().starts_with("application/json"));
        if !is_json {
            return Err(ClientError::SessionExpired);
        }

        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}
