//! # Paper Archivist
//!
//! 并发批量处理论文 PDF：LLM 分析 → 生成 LaTeX → 编译为报告
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有跨任务共享的资源，只暴露能力
//! - `ProcessingStateStore` - 持久化处理状态，`try_mark_processing` 是唯一的去重同步点
//! - `ResultCache` - 带 TTL 的分析结果缓存，只在编译成功后写入
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单篇论文
//! - `LlmAnalyzer` - 论文分析能力
//! - `LatexGenerator` - 写 .tex 能力
//! - `LatexCompiler` - 编译 PDF 能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一篇论文"的完整处理流程
//! - `ProcessingJob` - 任务（路径 + 指纹）
//! - `PaperFlow` - 流程编排（指纹 → 认领 → 缓存 → 分析 → 生成 → 编译 → 持久化）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/worker_pool` - 固定数量工作者 + 有界队列 + 取消
//! - `orchestrator/batch_processor` - 去重、调度、汇总
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{Fingerprint, ProcessingStateStore, ResultCache};
pub use orchestrator::{App, BatchProcessor, BatchReport, BatchSummary};
pub use workflow::{PaperFlow, PipelineDeps, ProcessingJob, ProcessingResult};
