use crate::error::AppError;
use crate::gateway::AppState;
use crate::gateway::extract::{json_body, optional_json_body};
use crate::rotation::store::AccountPatch;
use crate::rotation::summary::{self, AccountSummary};
use crate::rotation::types::{Account, AccountView, Classification, Provider};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountFilter {
    Classified(Classification),
    /// 指定提供方已耗尽（不论其他提供方状态）。
    ProviderExhausted(Provider),
}

impl AccountFilter {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "available" => Ok(Self::Classified(Classification::Available)),
            "partial" => Ok(Self::Classified(Classification::Partial)),
            "exhausted" => Ok(Self::Classified(Classification::Exhausted)),
            other => other
                .strip_suffix("_exhausted")
                .and_then(|p| p.parse::<Provider>().ok())
                .map(Self::ProviderExhausted)
                .ok_or_else(|| AppError::bad_request(format!("无效的筛选条件: {other}"))),
        }
    }

    fn matches(self, account: &Account) -> bool {
        match self {
            Self::Classified(c) => account.classification() == c,
            Self::ProviderExhausted(p) => !account.is_available(p),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccountSort {
    #[default]
    Newest,
    MostUsed,
    LeastUsed,
    Name,
}

impl AccountSort {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "created_at" | "newest" => Ok(Self::Newest),
            "most_used" => Ok(Self::MostUsed),
            "least_used" => Ok(Self::LeastUsed),
            "name" => Ok(Self::Name),
            other => Err(AppError::bad_request(format!("无效的排序方式: {other}"))),
        }
    }

    fn apply(self, accounts: &mut [Account]) {
        match self {
            Self::Newest => accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            Self::MostUsed => accounts.sort_by(|a, b| b.times_used.cmp(&a.times_used)),
            Self::LeastUsed => accounts.sort_by(|a, b| a.times_used.cmp(&b.times_used)),
            Self::Name => accounts.sort_by_key(|a| a.display_name().to_lowercase()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

/// GET /api/accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AccountView>>, AppError> {
    let filter = query.filter.as_deref().map(AccountFilter::parse).transpose()?;
    let sort = query
        .sort
        .as_deref()
        .map(AccountSort::parse)
        .transpose()?
        .unwrap_or_default();

    let mut accounts: Vec<Account> = state
        .store
        .accounts()
        .await
        .into_iter()
        .filter(|a| filter.is_none_or(|f| f.matches(a)))
        .collect();
    sort.apply(&mut accounts);

    Ok(Json(accounts.iter().map(AccountView::from).collect()))
}

/// POST /api/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AccountView>), AppError> {
    let req: CreateAccountRequest = json_body(&body)?;
    let account = state.store.create_account(&req.email, req.name).await?;
    tracing::info!(email = %account.email, "账号已登记");
    Ok((StatusCode::CREATED, Json(AccountView::from(&account))))
}

/// GET /api/accounts/summary
pub async fn account_summary(State(state): State<Arc<AppState>>) -> Json<AccountSummary> {
    let (accounts, sessions) = state.store.snapshot().await;
    Json(summary::summarize(&accounts, &sessions))
}

/// GET /api/accounts/{id}
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccountView>, AppError> {
    let account = state
        .store
        .get_account(&id)
        .await
        .ok_or_else(|| AppError::not_found("账号不存在"))?;
    Ok(Json(AccountView::from(&account)))
}

/// PUT /api/accounts/{id}
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<AccountView>, AppError> {
    let patch: AccountPatch = optional_json_body(&body)?;
    let account = state.store.update_account(&id, patch).await?;
    Ok(Json(AccountView::from(&account)))
}

/// DELETE /api/accounts/{id}
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_account(&id).await?;
    tracing::info!(account_id = %id, "账号已删除");
    Ok(StatusCode::NO_CONTENT)
}
