use anyhow::{Context, Result};
/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::orchestrator::BatchSummary;

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &Path) -> Result<()> {
    let log_header = format!(
        "{}\n论文处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    if let Some(parent) = log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("无法创建日志目录: {}", parent.display()))?;
    }
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法写入日志文件: {}", log_file_path.display()))?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 并发论文处理模式");
    info!("📊 工作者数量: {}", config.max_workers);
    info!("🤖 分析模型: {}", config.llm_model_name);
    if config.cache_enabled {
        info!(
            "💾 结果缓存: {} ({}, TTL {} 小时)",
            config.cache_backend,
            config.cache_dir.display(),
            config.cache_ttl_hours
        );
    } else {
        info!("💾 结果缓存: 已禁用");
    }
    if config.force_reprocess {
        info!("♻️ 强制重新处理已开启");
    }
    info!("{}", "=".repeat(60));
}

/// 记录待处理文件信息
///
/// # 参数
/// - `total`: 找到的 PDF 数量
/// - `workers`: 工作者数量
pub fn log_files_found(total: usize, workers: usize) {
    info!("✓ 找到 {} 个 PDF 文件", total);
    info!("📋 将由 {} 个工作者并发处理\n", workers);
}

/// 打印批处理汇总
pub fn print_summary(summary: &BatchSummary, log_file_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📄 总数: {}", summary.total);
    info!("✅ 成功: {}", summary.successful);
    info!("❌ 失败: {}", summary.failed);
    info!("⏭️ 跳过: {}", summary.skipped);
    if summary.abandoned > 0 {
        info!("🔁 放弃（重复内容）: {}", summary.abandoned);
    }
    if summary.cancelled > 0 {
        warn!("🛑 未执行（已取消）: {}", summary.cancelled);
    }
    info!("⏱️ 总耗时: {}", format_duration(summary.elapsed));
    if let Some(avg) = summary.average_per_item() {
        info!("📈 平均每篇: {}", format_duration(avg));
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path.display());
}

/// 以 `1h2m3s` / `2m3s` / `3.4s` 的形式显示时长
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
