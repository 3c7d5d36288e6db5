//! 批量论文处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量论文的去重、调度与汇总。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、状态存储、崩溃恢复、缓存与各项服务
//! 2. **文件发现**：扫描输入目录下的所有 PDF
//! 3. **去重**：缓存或状态存储任一认为已完成即跳过（强制模式除外）
//! 4. **并发处理**：交给 [`WorkerPool`]，提交与收集结果同时进行
//! 5. **全局统计**：汇总为 [`BatchSummary`]，有失败时返回聚合错误
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单篇论文的细节
//! - **向下委托**：单篇论文交给 `workflow::PaperFlow`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{AppError, AppResult, BatchError};
use crate::infrastructure::{fingerprint_file, ProcessingStateStore, ResultCache};
use crate::orchestrator::worker_pool::WorkerPool;
use crate::services::{LatexCompiler, LatexGenerator, LlmAnalyzer};
use crate::utils::logging::{init_log_file, log_files_found, log_startup, print_summary};
use crate::workflow::{JobStatus, PaperFlow, PipelineDeps, ProcessingJob, ProcessingResult};

/// 批处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// 输入文件总数
    pub total: usize,
    /// 实际入队的任务数
    pub enqueued: usize,
    /// 因去重未入队的文件数
    pub skipped: usize,
    pub successful: usize,
    pub failed: usize,
    /// 认领失败被放弃的任务（同批次内重复内容）
    pub abandoned: usize,
    /// 因取消未执行的文件：已入队未运行的，加上取消后未再检查的
    ///
    /// `total == skipped + successful + failed + abandoned + cancelled`
    pub cancelled: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    /// 成功任务的平均耗时；没有成功任务时为 `None`
    pub fn average_per_item(&self) -> Option<Duration> {
        u32::try_from(self.successful)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.elapsed / n)
    }
}

/// 批处理报告
#[derive(Debug)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub results: Vec<ProcessingResult>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &ProcessingResult> {
        self.results
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
    }

    /// 有任务失败时转换为聚合错误
    pub fn into_result(self) -> AppResult<BatchSummary> {
        let s = self.summary;
        if s.failed > 0 {
            return Err(BatchError::JobsFailed {
                failed: s.failed,
                successful: s.successful,
                skipped: s.skipped,
            }
            .into());
        }
        Ok(s)
    }
}

/// 批量处理器
pub struct BatchProcessor {
    flow: Arc<PaperFlow>,
    workers: usize,
    cancel: CancellationToken,
}

impl BatchProcessor {
    pub fn new(flow: Arc<PaperFlow>, workers: usize) -> Self {
        Self {
            flow,
            workers,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<ProcessingStateStore> {
        &self.flow.deps().store
    }

    /// 处理一批文件
    ///
    /// 单个任务的失败不会中断批处理，也不会作为 `Err` 返回；
    /// 调用 [`BatchReport::into_result`] 得到聚合错误。
    pub async fn process_batch(&self, files: Vec<PathBuf>, force: bool) -> AppResult<BatchReport> {
        if self.workers == 0 {
            return Err(AppError::invalid_config("max_workers", "必须大于 0"));
        }

        let start = Instant::now();
        let total = files.len();
        let mut pool = WorkerPool::start(self.workers, self.flow.clone(), self.cancel.clone());

        let tx = pool.submitter().ok_or(BatchError::QueueClosed)?;
        pool.close();

        // 生产者与结果收集并行，避免两个有界队列互相堵死
        let deps = self.flow.deps().clone();
        let cancel = self.cancel.clone();
        let producer = tokio::spawn(async move {
            let mut tally = Tally::default();
            for path in files {
                if cancel.is_cancelled() {
                    info!("🛑 已取消，停止提交任务");
                    break;
                }
                let job = match plan_job(&deps, path, force).await {
                    Plan::Enqueue(job) => job,
                    Plan::Skip => {
                        tally.skipped += 1;
                        continue;
                    }
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("🛑 已取消，停止提交任务");
                        break;
                    }
                    sent = tx.send(job) => {
                        if sent.is_err() {
                            warn!("任务队列已关闭，停止提交");
                            break;
                        }
                        tally.enqueued += 1;
                    }
                }
            }
            tally
        });

        let mut results = Vec::new();
        while let Some(result) = pool.next_result().await {
            results.push(result);
        }

        let tally = match producer.await {
            Ok(tally) => tally,
            Err(e) => {
                error!("任务提交异常退出: {}", e);
                pool.join().await;
                return Err(BatchError::QueueClosed.into());
            }
        };
        pool.join().await;

        let count = |status: JobStatus| results.iter().filter(|r| r.status == status).count();
        let successful = count(JobStatus::Completed);
        let failed = count(JobStatus::Failed);
        let abandoned = count(JobStatus::Abandoned);

        let unplanned = total.saturating_sub(tally.enqueued + tally.skipped);
        if unplanned > 0 {
            warn!("🛑 {} 个文件因取消未被检查", unplanned);
        }

        let summary = BatchSummary {
            total,
            enqueued: tally.enqueued,
            skipped: tally.skipped,
            successful,
            failed,
            abandoned,
            cancelled: unplanned + tally.enqueued.saturating_sub(results.len()),
            elapsed: start.elapsed(),
        };

        Ok(BatchReport { summary, results })
    }
}

/// 生产者的计数
#[derive(Debug, Default)]
struct Tally {
    enqueued: usize,
    skipped: usize,
}

enum Plan {
    Enqueue(ProcessingJob),
    /// 已缓存或已完成
    Skip,
}

/// 决定一个文件是否入队
///
/// 非强制模式下，缓存命中或状态为 completed 的文件直接跳过。
/// 指纹计算失败时仍然入队，由流程层上报失败。
async fn plan_job(deps: &PipelineDeps, path: PathBuf, force: bool) -> Plan {
    let name = path.display().to_string();
    let fingerprint = match fingerprint_file(&path).await {
        Ok(fp) => fp,
        Err(e) => {
            warn!("⚠️ {}，仍提交处理以记录失败", e);
            return Plan::Enqueue(ProcessingJob::new(path).with_force(force));
        }
    };

    if !force {
        if let Some(cache) = &deps.cache {
            match cache.exists(&fingerprint).await {
                Ok(true) => {
                    info!("⏭️ 跳过 {} (已缓存 #{})", name, fingerprint.short());
                    return Plan::Skip;
                }
                Ok(false) => {}
                Err(e) => warn!("⚠️ 缓存不可用，按未命中处理: {}", e),
            }
        }
        if deps.store.is_processed(&fingerprint).await {
            info!("⏭️ 跳过 {} (已处理 #{})", name, fingerprint.short());
            return Plan::Skip;
        }
    }

    debug!("入队 {} #{}", name, fingerprint.short());
    Plan::Enqueue(
        ProcessingJob::new(path)
            .with_fingerprint(fingerprint)
            .with_force(force),
    )
}

/// 收集待处理的 PDF
///
/// 单个 `.pdf` 文件直接返回；目录则递归查找（扩展名不区分大小写），结果排序。
/// 不跟随符号链接。
pub fn collect_pdf_files(path: &Path) -> AppResult<Vec<PathBuf>> {
    let meta = std::fs::metadata(path).map_err(|e| BatchError::InvalidInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if meta.is_file() {
        if !is_pdf(path) {
            return Err(BatchError::InvalidInput {
                path: path.to_path_buf(),
                reason: "不是 PDF 文件".to_string(),
            }
            .into());
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| BatchError::InvalidInput {
            path: e.path().unwrap_or(path).to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_pdf(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// 应用主结构
pub struct App {
    config: Config,
    processor: BatchProcessor,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> AppResult<Self> {
        // 初始化日志文件
        if let Err(e) = init_log_file(&config.output_log_file) {
            warn!("⚠️ 无法初始化日志文件: {:#}", e);
        }

        log_startup(&config);

        let store = Arc::new(ProcessingStateStore::open(&config.metadata_dir).await?);
        let recovered = store.recover_interrupted().await?;
        if recovered > 0 {
            warn!("♻️ 发现 {} 条上次中断的记录，已标记为失败以便重试", recovered);
        }

        let cache = ResultCache::from_config(&config).map(Arc::new);

        let compiler = LatexCompiler::from_config(&config);
        if let Err(e) = compiler.check_dependencies().await {
            warn!("⚠️ LaTeX 工具链检查未通过: {:#}", e);
        }

        let deps = PipelineDeps {
            store,
            cache,
            analyzer: Arc::new(LlmAnalyzer::new(&config)),
            generator: Arc::new(LatexGenerator::new(&config.tex_output_dir)),
            compiler: Arc::new(compiler),
        };
        let flow = Arc::new(PaperFlow::from_config(deps, &config));
        let processor = BatchProcessor::new(flow, config.max_workers);

        Ok(Self { config, processor })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> AppResult<BatchSummary> {
        info!("\n📁 正在扫描待处理的论文...");
        let files = collect_pdf_files(&self.config.input_dir)?;

        if files.is_empty() {
            warn!("⚠️ 没有找到待处理的 PDF 文件，程序结束");
            return Ok(BatchSummary::default());
        }
        log_files_found(files.len(), self.config.max_workers);

        // Ctrl-C 时让工作者在当前任务结束后停止
        let cancel = self.processor.cancellation_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 收到中断信号，等待进行中的任务完成...");
                cancel.cancel();
            }
        });

        let report = self
            .processor
            .process_batch(files, self.config.force_reprocess)
            .await;
        watcher.abort();
        let report = report?;

        for failure in report.failures() {
            if let Some(err) = &failure.error {
                error!("❌ {}: {}", failure.file_path().display(), err);
            }
        }

        print_summary(&report.summary, &self.config.output_log_file);
        report.into_result()
    }
}
