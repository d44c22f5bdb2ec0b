use crate::error::AppError;
use crate::gateway::AppState;
use crate::gateway::extract::{optional_json_body, provider_param};
use crate::rotation::types::{AccountView, Provider, Quotas};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct MarkExhaustedRequest {
    #[serde(default)]
    scheduled_reset: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextReset {
    pub provider: Provider,
    pub next_reset: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetCheck {
    pub reset_count: usize,
}

/// GET /api/quotas/{account_id}
pub async fn get_quotas(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<Quotas>, AppError> {
    let account = state
        .store
        .get_account(&account_id)
        .await
        .ok_or_else(|| AppError::not_found("账号不存在"))?;
    Ok(Json(account.quotas))
}

/// POST /api/quotas/{account_id}/{provider}/exhausted
pub async fn mark_exhausted(
    State(state): State<Arc<AppState>>,
    Path((account_id, provider)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<AccountView>, AppError> {
    let provider = provider_param(&provider)?;
    let req: MarkExhaustedRequest = optional_json_body(&body)?;
    let account = state
        .store
        .mark_exhausted(&account_id, provider, req.scheduled_reset)
        .await?;
    tracing::info!(
        account = %account.email,
        provider = %provider,
        scheduled_reset = ?req.scheduled_reset,
        "额度已标记为耗尽"
    );
    Ok(Json(AccountView::from(&account)))
}

/// POST /api/quotas/{account_id}/{provider}/reset
pub async fn reset_quota(
    State(state): State<Arc<AppState>>,
    Path((account_id, provider)): Path<(String, String)>,
) -> Result<Json<AccountView>, AppError> {
    let provider = provider_param(&provider)?;
    let account = state.store.mark_available(&account_id, provider).await?;
    tracing::info!(account = %account.email, provider = %provider, "额度已手动恢复");
    Ok(Json(AccountView::from(&account)))
}

/// GET /api/quotas/next-reset/{provider}
pub async fn next_reset(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<NextReset>, AppError> {
    let provider = provider_param(&provider)?;
    Ok(Json(NextReset {
        provider,
        next_reset: state.store.next_reset(provider).await,
    }))
}

/// POST /api/quotas/check-resets
pub async fn check_resets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetCheck>, AppError> {
    let reset_count = state.store.apply_pending_resets(Utc::now()).await?;
    Ok(Json(ResetCheck { reset_count }))
}
