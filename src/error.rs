//! 错误类型
//!
//! 基础设施层与编排层返回带类型的错误；服务层（协作方实现）沿用 `anyhow`，
//! 由流程层折叠成 [`PipelineError`]。

use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 处理状态存储错误
    #[error("状态存储错误: {0}")]
    Store(#[from] StoreError),
    /// 结果缓存错误
    #[error("结果缓存错误: {0}")]
    Cache(#[from] CacheError),
    /// 单个任务的处理流程错误
    #[error("处理流程错误: {0}")]
    Pipeline(#[from] PipelineError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 批处理错误
    #[error("批处理错误: {0}")]
    Batch(#[from] BatchError),
    /// 其他 I/O 错误
    #[error("文件错误 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 处理状态存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 无法创建元数据目录
    #[error("无法创建元数据目录 {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 读取状态文件失败
    #[error("读取状态文件失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 状态文件内容损坏（拒绝静默丢弃历史）
    #[error("状态文件已损坏 {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// 序列化失败
    #[error("序列化状态失败: {0}")]
    Serialize(#[source] serde_json::Error),
    /// 写入状态文件失败
    #[error("写入状态文件失败 {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 结果缓存错误
///
/// 对流水线而言这些错误都不是致命的，调用方按未命中处理。
#[derive(Debug, Error)]
pub enum CacheError {
    /// 后端不可用
    #[error("缓存后端不可用: {0}")]
    Unavailable(String),
    /// 缓存值无法解码
    #[error("缓存值解码失败 (key: {key}): {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// 缓存值无法编码
    #[error("缓存值编码失败: {0}")]
    Encode(#[source] serde_json::Error),
    /// 删除时条目不存在
    #[error("缓存条目不存在: {0}")]
    NotFound(String),
    /// 磁盘后端 I/O 失败
    #[error("缓存文件操作失败 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 单个任务的处理流程错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 无法计算文件指纹
    #[error("无法计算文件指纹 {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 分析失败
    #[error("分析失败: {0}")]
    Analysis(String),
    /// 分析超时
    #[error("分析超时 ({secs} 秒)，可调大 timeout_per_paper_secs")]
    AnalysisTimeout { secs: u64 },
    /// 生成中间文件失败
    #[error("LaTeX 文件生成失败: {0}")]
    Generation(String),
    /// 编译失败
    #[error("PDF 编译失败: {0}")]
    Compilation(String),
    /// 状态存储写入失败
    #[error("状态记录失败: {0}")]
    Store(#[from] StoreError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件解析失败
    #[error("配置文件解析失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 配置项取值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 批处理错误
#[derive(Debug, Error)]
pub enum BatchError {
    /// 部分任务失败（其余结果均已持久化）
    #[error("{failed} 篇论文处理失败 (成功 {successful}, 跳过 {skipped})")]
    JobsFailed {
        failed: usize,
        successful: usize,
        skipped: usize,
    },
    /// 输入路径不可用
    #[error("输入路径不可用 {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },
    /// 任务队列已关闭，无法继续提交
    #[error("任务队列已关闭")]
    QueueClosed,
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建 I/O 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }

    /// 创建配置项非法错误
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Invalid {
            field,
            reason: reason.into(),
        })
    }

    /// 是否为"部分任务失败"这类非致命的聚合错误
    pub fn is_partial_failure(&self) -> bool {
        matches!(self, AppError::Batch(BatchError::JobsFailed { .. }))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_detection() {
        let err: AppError = BatchError::JobsFailed {
            failed: 2,
            successful: 5,
            skipped: 3,
        }
        .into();
        assert!(err.is_partial_failure());
        assert!(err.to_string().contains("2 篇论文处理失败"));

        let fatal = AppError::invalid_config("max_workers", "必须大于 0");
        assert!(!fatal.is_partial_failure());
    }
}
