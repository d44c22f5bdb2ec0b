//! HTTP 接口层：`/api` 下的账号、额度、会话路由，以及通用中间件。

pub mod accounts;
pub mod extract;
pub mod middleware;
pub mod quotas;
pub mod sessions;

use crate::config::Config;
use crate::rotation::Store;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub struct AppState {
    pub store: Arc<Store>,
    pub cfg: Config,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut api_routes = Router::new()
        .route(
            "/api/accounts",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route("/api/accounts/summary", get(accounts::account_summary))
        .route(
            "/api/accounts/{id}",
            get(accounts::get_account)
                .put(accounts::update_account)
                .delete(accounts::delete_account),
        )
        .route("/api/quotas/check-resets", post(quotas::check_resets))
        .route("/api/quotas/next-reset/{provider}", get(quotas::next_reset))
        .route("/api/quotas/{account_id}", get(quotas::get_quotas))
        .route(
            "/api/quotas/{account_id}/{provider}/exhausted",
            post(quotas::mark_exhausted),
        )
        .route(
            "/api/quotas/{account_id}/{provider}/reset",
            post(quotas::reset_quota),
        )
        .route("/api/sessions/start", post(sessions::start_session))
        .route("/api/sessions/end", post(sessions::end_session))
        .route("/api/sessions/active", get(sessions::active_session))
        .route("/api/sessions/rotate", post(sessions::rotate))
        .route("/api/sessions/history", get(sessions::history))
        .route("/api/sessions/stats", get(sessions::stats))
        .with_state(state.clone());

    if let Some(limiter) = middleware::api_limiter(state.cfg.rate_limit_per_minute) {
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit,
        ));
    }

    Router::new()
        .route("/health", get(handle_health))
        .merge(api_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.cfg.log_level(),
            middleware::access_log,
        ))
        .layer(axum::middleware::from_fn(middleware::security_headers))
}

async fn handle_health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::util::id;

    pub(crate) async fn test_state_with(cfg: Config) -> Arc<AppState> {
        let store = Arc::new(Store::new(&cfg.data_dir));
        store.load().await.unwrap();
        Arc::new(AppState { store, cfg })
    }

    pub(crate) async fn test_state() -> Arc<AppState> {
        let dir = id::scratch_dir("rotator-gateway");
        let mut cfg = Config::with_data_dir(dir.to_string_lossy());
        cfg.rate_limit_per_minute = 0;
        test_state_with(cfg).await
    }

    async fn serve(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, build_router(state)).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let base = serve(test_state().await).await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let h = resp.headers();
        assert_eq!(h["x-content-type-options"], "nosniff");
        assert_eq!(h["x-frame-options"], "DENY");
        assert_eq!(h["x-xss-protection"], "1; mode=block");
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn api_is_rate_limited_but_health_is_not() {
        let dir = id::scratch_dir("rotator-ratelimit");
        let mut cfg = Config::with_data_dir(dir.to_string_lossy());
        cfg.rate_limit_per_minute = 2;
        let base = serve(test_state_with(cfg).await).await;

        let client = reqwest::Client::new();
        for _ in 0..2 {
            let resp = client
                .get(format!("{base}/api/accounts"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
        }
        let resp = client
            .get(format!("{base}/api/accounts"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
        let body: crate::error::ErrorBody = resp.json().await.unwrap();
        assert_eq!(body.error.r#type.as_deref(), Some("rate_limited"));

        let resp = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn routes_resolve_static_segments_before_params() {
        let base = serve(test_state().await).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/quotas/check-resets"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let check: quotas::ResetCheck = resp.json().await.unwrap();
        assert_eq!(check.reset_count, 0);

        let resp = client
            .get(format!("{base}/api/accounts/summary"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = client
            .get(format!("{base}/api/accounts/does-not-exist"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
