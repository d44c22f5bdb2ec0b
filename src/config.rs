use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8046;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 30;
const DEFAULT_RESET_CHECK_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_STATS_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// 运行模式：HTTP 服务端，或连接服务端的终端伴随进程。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Watch,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub data_dir: String,
    pub debug: String,

    /// 每分钟允许的 /api 请求数；0 表示不限流。
    pub rate_limit_per_minute: u32,

    pub server_url: String,
    pub reset_check_interval_secs: u64,
    pub stats_refresh_interval_secs: u64,
    pub timeout_ms: u64,

    pub mode: Mode,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "DATA_DIR")]
    data_dir: Option<String>,
    #[serde(alias = "DEBUG")]
    debug: Option<String>,

    #[serde(alias = "RATE_LIMIT_PER_MINUTE")]
    rate_limit_per_minute: Option<u32>,

    #[serde(alias = "SERVER_URL")]
    server_url: Option<String>,
    #[serde(alias = "RESET_CHECK_INTERVAL_SECS")]
    reset_check_interval_secs: Option<u64>,
    #[serde(alias = "STATS_REFRESH_INTERVAL_SECS")]
    stats_refresh_interval_secs: Option<u64>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>、-watch
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            } else if arg == "-watch" {
                cfg.mode = Mode::Watch;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        let port = raw.port.unwrap_or(DEFAULT_PORT);
        let server_url = raw
            .server_url
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));

        Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            data_dir: raw
                .data_dir
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
            rate_limit_per_minute: raw
                .rate_limit_per_minute
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
            server_url,
            reset_check_interval_secs: raw
                .reset_check_interval_secs
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_RESET_CHECK_INTERVAL_SECS),
            stats_refresh_interval_secs: raw
                .stats_refresh_interval_secs
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_STATS_REFRESH_INTERVAL_SECS),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            mode: Mode::Serve,
        }
    }

    /// 测试与内嵌场景使用：全部取默认值，数据目录由调用方指定。
    pub fn with_data_dir(data_dir: impl Into<String>) -> Self {
        let mut cfg = Self::from_raw(RawEnv::default());
        cfg.data_dir = data_dir.into();
        cfg
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }

    pub fn reset_check_interval(&self) -> Duration {
        Duration::from_secs(self.reset_check_interval_secs)
    }

    pub fn stats_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.stats_refresh_interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms > 0 {
            Some(Duration::from_millis(self.timeout_ms))
        } else {
            None
        }
    }
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 已存在的进程环境变量优先于 .env。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段、tokio 尚未派生任何任务前加载 .env，符合使用前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 避免跨越仓库根目录：发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let parent = dir.parent()?;
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let eq_idx = line.find('=')?;
    if eq_idx == 0 {
        return None;
    }

    let key = line[..eq_idx].trim();
    if key.is_empty() {
        return None;
    }

    let raw = line[eq_idx + 1..].trim();
    if raw.is_empty() {
        return Some((key.to_string(), String::new()));
    }

    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}
