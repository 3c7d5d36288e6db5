//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量论文处理器
//! - 管理应用生命周期（初始化、运行）
//! - 扫描输入目录，按缓存/状态去重
//! - 汇总统计，返回聚合错误
//!
//! ### `worker_pool` - 工作者池
//! - 固定数量的工作者，有界任务队列与结果队列（容量 2W）
//! - 统一的取消信号，只在任务之间生效
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<PathBuf>)
//!     ↓
//! worker_pool (W 个工作者)
//!     ↓
//! workflow::PaperFlow (处理单篇论文)
//!     ↓
//! services (能力层：analyze / generate / compile)
//!     ↓
//! infrastructure (指纹、状态存储、结果缓存)
//! ```

pub mod batch_processor;
pub mod worker_pool;

// 重新导出主要类型
pub use batch_processor::{collect_pdf_files, App, BatchProcessor, BatchReport, BatchSummary};
pub use worker_pool::WorkerPool;
