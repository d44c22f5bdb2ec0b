use axum::http::HeaderMap;
use std::time::Duration;

/// 访问日志等级（由 DEBUG 控制）：
/// - off：不输出访问日志
/// - low：方法、路径、状态码、耗时
/// - medium：额外输出请求头（脱敏）
/// - high：额外输出请求体（截断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "access" => Self::Low,
            "medium" | "headers" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn access_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn headers_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn body_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn access(method: &str, path: &str, status: u16, duration: Duration) {
    tracing::info!(
        "[访问] {method} {path} -> {status} {}ms",
        format_duration_ms(duration)
    );
}

pub fn request_detail(method: &str, path: &str, headers: &HeaderMap, body: Option<&[u8]>) {
    match body {
        Some(body) => tracing::info!(
            "\n===================== 请求详情 ======================\n[请求] {method} {path}\n[请求头]\n{}\n[请求体]\n{}\n=====================================================",
            format_headers(headers),
            format_body_bytes(body)
        ),
        None => tracing::info!(
            "\n===================== 请求详情 ======================\n[请求] {method} {path}\n[请求头]\n{}\n=====================================================",
            format_headers(headers)
        ),
    }
}

const REDACTED_HEADERS: [&str; 4] = ["authorization", "proxy-authorization", "x-api-key", "cookie"];

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        let val = if REDACTED_HEADERS.contains(&key) {
            "***"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        out.push_str(key);
        out.push_str(": ");
        out.push_str(val);
        out.push('\n');
    }
    out
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(v) => serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string()),
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 4 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parse_levels_and_aliases() {
        assert_eq!(LogLevel::parse("off"), LogLevel::Off);
        assert_eq!(LogLevel::parse(" LOW "), LogLevel::Low);
        assert_eq!(LogLevel::parse("medium"), LogLevel::Medium);
        assert_eq!(LogLevel::parse("raw"), LogLevel::High);
        assert_eq!(LogLevel::parse("whatever"), LogLevel::Off);
        assert!(LogLevel::Medium.headers_enabled());
        assert!(!LogLevel::Medium.body_enabled());
        assert!(!LogLevel::Off.access_enabled());
    }

    #[test]
    fn headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("cookie", HeaderValue::from_static("sid=abc"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let out = format_headers(&headers);
        assert!(!out.contains("secret"));
        assert!(!out.contains("sid=abc"));
        assert!(out.contains("authorization: ***"));
        assert!(out.contains("content-type: application/json"));
    }

    #[test]
    fn long_text_body_is_truncated() {
        let body = "x".repeat(5000);
        let out = format_body_bytes(body.as_bytes());
        assert!(out.ends_with("...[TRUNCATED]"));
        assert_eq!(format_body_bytes(b""), "");
    }
}
