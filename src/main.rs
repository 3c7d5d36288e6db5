use std::path::PathBuf;

use anyhow::Result;
use paper_archivist::{logger, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：ARCHIVIST_CONFIG 指定的 TOML 文件（可选）+ 环境变量
    let config_path = std::env::var("ARCHIVIST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("archivist.toml"));
    let config = Config::load(Some(config_path.as_path()))?;

    // 初始化日志
    logger::init_with(config.verbose_logging);

    // 初始化并运行应用
    let summary = App::initialize(config).await?.run().await?;
    tracing::debug!("{:?}", summary);

    Ok(())
}
