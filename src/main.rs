//! Nexa 网关入口：加载 .env 与配置、初始化日志，启动 HTTP 服务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use nexa::gateway::{self, AppState};
use nexa::{load_config, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 不存在时忽略
    let _ = dotenvy::dotenv();
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let state = AppState::from_config(cfg).context("Failed to build gateway state")?;
    gateway::serve(Arc::new(state)).await.context("Gateway server failed")?;

    Ok(())
}
