use uuid::Uuid;

pub fn account_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn session_id() -> String {
    format!("sess-{}", Uuid::new_v4().simple())
}

/// 唯一的临时目录名（测试用，避免并行测试互相覆盖数据文件）。
#[cfg(test)]
pub fn scratch_dir(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}", Uuid::new_v4().simple()))
}
