//! 日志初始化
//!
//! `RUST_LOG` 优先；未设置时为 `info`，开启详细日志时为 `debug`。

use tracing_subscriber::EnvFilter;

/// 以默认级别初始化
pub fn init() {
    init_with(false);
}

/// 初始化全局日志；重复调用是无害的
pub fn init_with(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
