use crate::error::AppError;
use crate::rotation::Provider;
use serde::de::DeserializeOwned;

const INVALID_JSON: &str = "请求 JSON 解析失败，请检查请求体格式";

/// 解析必填的 JSON 请求体。
pub fn json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    sonic_rs::from_slice(body).map_err(|e| {
        tracing::debug!("请求体解析失败: {e}");
        AppError::bad_request(INVALID_JSON)
    })
}

/// 解析可选的 JSON 请求体：空 body 视为全部字段取默认值。
pub fn optional_json_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    json_body(body)
}

pub fn provider_param(raw: &str) -> Result<Provider, AppError> {
    raw.parse::<Provider>().map_err(AppError::BadRequest)
}
