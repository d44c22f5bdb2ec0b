pub mod companion;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod rotation;
pub mod util;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing(&cfg);

    match cfg.mode {
        config::Mode::Serve => serve(cfg).await,
        config::Mode::Watch => watch(cfg).await,
    }
}

async fn serve(cfg: config::Config) -> anyhow::Result<()> {
    let store = Arc::new(rotation::Store::new(&cfg.data_dir));
    store.load().await.context("加载 tracker.json 失败")?;

    let account_count = store.count().await;
    tracing::info!("已加载 {account_count} 个账号");

    // 启动时先处理一次到期的额度恢复，之后由伴随进程轮询触发。
    match store.apply_pending_resets(chrono::Utc::now()).await {
        Ok(n) if n > 0 => tracing::info!("启动时恢复了 {n} 个到期额度"),
        Ok(_) => {}
        Err(e) => tracing::warn!("启动时检查额度恢复失败：{e:#}"),
    }

    let state = Arc::new(gateway::AppState {
        store,
        cfg: cfg.clone(),
    });
    let app = gateway::build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

async fn watch(cfg: config::Config) -> anyhow::Result<()> {
    tracing::info!("伴随进程连接 {}", cfg.server_url);
    let companion = companion::Companion::new(&cfg, Arc::new(companion::notice::TracingNotifier))
        .context("初始化伴随进程失败")?;
    Arc::new(companion).run().await
}

fn init_tracing(cfg: &config::Config) {
    // 服务端 DEBUG=off 关闭全部日志；伴随进程的日志即其展示，始终保留。
    // 其余情况下依赖库默认 warn，本项目至少 info，以免环境中预设的 RUST_LOG=warn 把关键日志过滤掉。
    let silenced = cfg.mode == config::Mode::Serve && cfg.log_level() == logging::LogLevel::Off;
    let filter = if silenced {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new("warn,quota_rotator=info")
        } else if env.contains("quota_rotator") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},quota_rotator=info"))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
