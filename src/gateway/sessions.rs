use crate::error::AppError;
use crate::gateway::AppState;
use crate::gateway::extract::{json_body, optional_json_body, provider_param};
use crate::rotation::store::{HistoryQuery, RotateRequest, RotationReport, StartedSession};
use crate::rotation::summary::{self, SessionStats};
use crate::rotation::types::{AccountView, EndReason, Provider, Session};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct StartRequest {
    account_id: String,
    provider: Provider,
    /// 续接本地保存的会话时已累计的毫秒数。
    #[serde(default)]
    offset_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct EndRequest {
    #[serde(default)]
    reason: Option<EndReason>,
    #[serde(default)]
    scheduled_reset: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndedSession {
    pub session: Session,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveSession {
    pub active: bool,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub account: Option<AccountView>,
    #[serde(default)]
    pub elapsed_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct History {
    pub sessions: Vec<Session>,
    pub total: usize,
}

/// POST /api/sessions/start
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartedSession>), AppError> {
    let req: StartRequest = json_body(&body)?;
    let started = state
        .store
        .start_session(&req.account_id, req.provider, req.offset_ms.unwrap_or(0))
        .await?;
    let status = if started.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(started)))
}

/// POST /api/sessions/end
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<EndedSession>, AppError> {
    let req: EndRequest = optional_json_body(&body)?;
    let reason = req.reason.unwrap_or(EndReason::Manual);
    let session = state
        .store
        .end_session(reason, req.scheduled_reset)
        .await?
        .ok_or_else(|| AppError::not_found("没有进行中的会话"))?;
    Ok(Json(EndedSession { session }))
}

/// GET /api/sessions/active
pub async fn active_session(State(state): State<Arc<AppState>>) -> Json<ActiveSession> {
    let Some((session, account)) = state.store.active_session().await else {
        return Json(ActiveSession {
            active: false,
            session: None,
            account: None,
            elapsed_ms: None,
        });
    };
    let elapsed_ms = session.elapsed_at(Utc::now()).num_milliseconds();
    Json(ActiveSession {
        active: true,
        session: Some(session),
        account: Some(AccountView::from(&account)),
        elapsed_ms: Some(elapsed_ms),
    })
}

/// POST /api/sessions/rotate
pub async fn rotate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RotationReport>, AppError> {
    let req: RotateRequest = optional_json_body(&body)?;
    Ok(Json(state.store.rotate(req).await?))
}

/// GET /api/sessions/history
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<History>, AppError> {
    let query = HistoryQuery {
        limit: params.limit,
        account_id: params.account_id.filter(|s| !s.trim().is_empty()),
        provider: params
            .provider
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(provider_param)
            .transpose()?,
    };
    let sessions = state.store.history(&query).await;
    Ok(Json(History {
        total: sessions.len(),
        sessions,
    }))
}

/// GET /api/sessions/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<SessionStats> {
    let (_, sessions) = state.store.snapshot().await;
    Json(summary::session_stats(&sessions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::test_state;
    use crate::rotation::store::RotationOutcome;

    fn start_body(account_id: &str, provider: &str) -> Bytes {
        Bytes::from(
            serde_json::json!({ "account_id": account_id, "provider": provider }).to_string(),
        )
    }

    #[tokio::test]
    async fn start_is_idempotent_and_conflicts_on_other_account() {
        let state = test_state().await;
        let a = state.store.create_account("a@example.com", None).await.unwrap();
        let b = state.store.create_account("b@example.com", None).await.unwrap();

        let (status, Json(first)) =
            start_session(State(state.clone()), start_body(&a.id, "anthropic"))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let (status, Json(again)) =
            start_session(State(state.clone()), start_body(&a.id, "anthropic"))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again.session.id, first.session.id);

        let err = start_session(State(state.clone()), start_body(&b.id, "gemini"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = start_session(State(state), start_body(&b.id, "openai"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn huge_offset_is_bad_request() {
        let state = test_state().await;
        let a = state.store.create_account("a@example.com", None).await.unwrap();
        let body = Bytes::from(
            serde_json::json!({ "account_id": a.id, "provider": "anthropic", "offset_ms": i64::MAX })
                .to_string(),
        );
        let err = start_session(State(state.clone()), body).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(active) = active_session(State(state)).await;
        assert!(!active.active);
    }

    #[tokio::test]
    async fn active_end_and_history() {
        let state = test_state().await;
        let a = state.store.create_account("a@example.com", None).await.unwrap();

        let Json(none) = active_session(State(state.clone())).await;
        assert!(!none.active);

        let body = Bytes::from(
            serde_json::json!({ "account_id": a.id, "provider": "gemini", "offset_ms": 60_000 })
                .to_string(),
        );
        start_session(State(state.clone()), body).await.unwrap();

        let Json(active) = active_session(State(state.clone())).await;
        assert!(active.active);
        assert!(active.elapsed_ms.unwrap() >= 60_000);
        assert_eq!(active.account.unwrap().account.id, a.id);

        let Json(ended) = end_session(State(state.clone()), Bytes::new())
            .await
            .unwrap();
        assert_eq!(ended.session.end_reason, Some(EndReason::Manual));
        assert!(ended.session.duration_secs.unwrap() >= 60);

        let err = end_session(State(state.clone()), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let Json(h) = history(
            State(state.clone()),
            Query(HistoryParams {
                provider: Some("gemini".to_string()),
                ..HistoryParams::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(h.total, 1);

        let Json(s) = stats(State(state)).await;
        assert_eq!(s.total_sessions, 1);
        assert_eq!(s.by_provider[&Provider::Gemini].sessions, 1);
    }

    #[tokio::test]
    async fn rotate_body_is_optional() {
        let state = test_state().await;
        let Json(report) = rotate(State(state.clone()), Bytes::new()).await.unwrap();
        assert!(matches!(report.outcome, RotationOutcome::NoAccounts { .. }));

        state.store.create_account("a@example.com", None).await.unwrap();
        let Json(report) = rotate(State(state.clone()), Bytes::from(r#"{"auto_start":false}"#))
            .await
            .unwrap();
        assert!(matches!(report.outcome, RotationOutcome::Selected { .. }));

        let err = rotate(State(state), Bytes::from(r#"{"reason":"bored"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
