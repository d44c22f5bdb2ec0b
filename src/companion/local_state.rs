use crate::rotation::types::{Provider, elapsed_with_offset};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const LOCAL_STATE_FILE_NAME: &str = "local_session.json";
const SCHEMA_VERSION: u32 = 1;

/// 本地保存的进行中会话。只记录时间戳与偏移，已用时长总是现算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSession {
    pub account_id: String,
    pub provider: Provider,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub offset_ms: i64,
    pub saved_at: DateTime<Utc>,
}

impl LocalSession {
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        elapsed_with_offset(self.started_at, now, self.offset_ms)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    session: LocalSession,
}

/// 伴随进程的本地会话记录；文件不存在即没有进行中的会话。
#[derive(Debug, Clone)]
pub struct LocalSessionStore {
    file_path: PathBuf,
}

impl LocalSessionStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            file_path: data_dir.as_ref().join(LOCAL_STATE_FILE_NAME),
        }
    }

    pub async fn read(&self) -> anyhow::Result<Option<LocalSession>> {
        let data = match tokio::fs::read(&self.file_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("读取本地会话失败"),
        };

        let envelope: Envelope = match sonic_rs::from_slice(&data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("本地会话文件损坏，已忽略: {e}");
                return Ok(None);
            }
        };
        if envelope.version != SCHEMA_VERSION {
            tracing::warn!(
                version = envelope.version,
                "本地会话文件版本不兼容，已忽略"
            );
            return Ok(None);
        }
        Ok(Some(envelope.session))
    }

    pub async fn write(&self, session: &LocalSession) -> anyhow::Result<()> {
        if let Some(dir) = self.file_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context("创建数据目录失败")?;
        }
        let envelope = Envelope {
            version: SCHEMA_VERSION,
            session: session.clone(),
        };
        let data = sonic_rs::to_vec_pretty(&envelope).context("序列化本地会话失败")?;
        tokio::fs::write(&self.file_path, data)
            .await
            .context("写入本地会话失败")
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.file_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("删除本地会话失败"),
        }
    }
}
