use crate::error::AppError;
use crate::logging::{self, LogLevel};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

/// high 等级下为打印请求体而缓冲的最大字节数。
const MAX_LOGGED_BODY: usize = 1024 * 1024;

pub type ApiLimiter = DefaultDirectRateLimiter;

/// 进程级 /api 限流器；0 表示不限流。
pub fn api_limiter(per_minute: u32) -> Option<Arc<ApiLimiter>> {
    let per_minute = NonZeroU32::new(per_minute)?;
    Some(Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))))
}

pub async fn rate_limit(
    State(limiter): State<Arc<ApiLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.check().is_err() {
        tracing::warn!(path = %request.uri().path(), "请求被限流");
        return AppError::TooManyRequests.into_response();
    }
    next.run(request).await
}

pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut resp = next.run(request).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    resp
}

pub async fn access_log(State(level): State<LogLevel>, request: Request, next: Next) -> Response {
    if !level.access_enabled() {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let request = if level.body_enabled() {
        let (parts, body) = request.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_LOGGED_BODY).await {
            Ok(b) => b,
            Err(_) => return AppError::bad_request("请求体过大").into_response(),
        };
        logging::request_detail(method.as_str(), &path, &parts.headers, Some(bytes.as_ref()));
        Request::from_parts(parts, Body::from(bytes))
    } else {
        if level.headers_enabled() {
            logging::request_detail(method.as_str(), &path, request.headers(), None);
        }
        request
    };

    let resp = next.run(request).await;
    logging::access(method.as_str(), &path, resp.status().as_u16(), start.elapsed());
    resp
}
