//! 论文处理流程 - 流程层
//!
//! 核心职责：定义"一篇论文"的完整处理流程
//!
//! 流程顺序：
//! 1. 计算指纹
//! 2. 认领（try_mark_processing），失败则放弃
//! 3. 查缓存，命中则跳过分析
//! 4. LLM 分析 → 提取标题
//! 5. 生成 .tex
//! 6. 编译 PDF
//! 7. 标记完成，未命中缓存时回写缓存
//! 8. 返回结果
//!
//! 任一阶段失败都会短路后续阶段并把记录标记为 failed，流程内不重试。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::infrastructure::{
    fingerprint_file, CachedAnalysisEntry, Fingerprint, ProcessingRecord, ProcessingStateStore,
    ResultCache,
};
use crate::services::{Analyzer, ArtifactGenerator, Compiler};
use crate::workflow::job::{JobStatus, ProcessingJob, ProcessingResult};
use crate::workflow::title::extract_title;

/// 流程依赖
///
/// 状态存储与缓存是唯一的共享可变资源，二者内部自行同步
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<ProcessingStateStore>,
    pub cache: Option<Arc<ResultCache>>,
    pub analyzer: Arc<dyn Analyzer>,
    pub generator: Arc<dyn ArtifactGenerator>,
    pub compiler: Arc<dyn Compiler>,
}

/// 已认领任务在各阶段积累的产物
#[derive(Default)]
struct Progress {
    title: Option<String>,
    artifact_path: Option<std::path::PathBuf>,
    output_path: Option<std::path::PathBuf>,
    from_cache: bool,
}

/// 论文处理流程
///
/// - 编排单篇论文的完整流程
/// - 不持有任务之间的状态
/// - 只依赖业务能力（services）和基础设施
pub struct PaperFlow {
    deps: PipelineDeps,
    analysis_timeout: Duration,
}

impl PaperFlow {
    pub fn new(deps: PipelineDeps, analysis_timeout: Duration) -> Self {
        Self {
            deps,
            analysis_timeout,
        }
    }

    pub fn from_config(deps: PipelineDeps, config: &Config) -> Self {
        Self::new(deps, config.analysis_timeout())
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// 处理单个任务，总是返回一个结果
    pub async fn run(&self, mut job: ProcessingJob, worker_id: usize) -> ProcessingResult {
        let start = Instant::now();
        info!("[工作者 {}] 📄 开始处理 {}", worker_id, job.display_name());

        // ========== 1. 指纹 ==========
        let fingerprint = match job.fingerprint.clone() {
            Some(fp) => fp,
            None => match fingerprint_file(&job.file_path).await {
                Ok(fp) => {
                    job.fingerprint = Some(fp.clone());
                    fp
                }
                Err(e) => {
                    // 占位身份只用于结果上报，不进入缓存和状态存储
                    let placeholder = Fingerprint::placeholder();
                    warn!(
                        "[工作者 {}] ⚠️ 无法计算指纹，降级为占位身份 {}: {}",
                        worker_id, placeholder, e
                    );
                    return ProcessingResult::failed(job, placeholder, e, start.elapsed());
                }
            },
        };

        // ========== 2. 认领 ==========
        let claimed = if job.force {
            self.deps
                .store
                .try_mark_reprocessing(&fingerprint, &job.file_path)
                .await
        } else {
            self.deps
                .store
                .try_mark_processing(&fingerprint, &job.file_path)
                .await
        };
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "[工作者 {}] ⏭️ {} 已有进行中或已完成的处理，放弃",
                    worker_id, job
                );
                return ProcessingResult::abandoned(job, fingerprint, start.elapsed());
            }
            Err(e) => {
                error!("[工作者 {}] ❌ 无法写入处理状态: {}", worker_id, e);
                return ProcessingResult::failed(job, fingerprint, e.into(), start.elapsed());
            }
        }

        // ========== 3-7 ==========
        let mut progress = Progress::default();
        let outcome = self
            .execute(&job, &fingerprint, worker_id, &mut progress)
            .await;

        let duration = start.elapsed();
        let error = match outcome {
            Ok(()) => {
                info!(
                    "[工作者 {}] ✅ 完成 {} ({:.1}s{})",
                    worker_id,
                    job.display_name(),
                    duration.as_secs_f64(),
                    if progress.from_cache { ", 使用缓存" } else { "" }
                );
                None
            }
            Err(e) => {
                error!("[工作者 {}] ❌ {} 处理失败: {}", worker_id, job.display_name(), e);
                if let Err(store_err) = self
                    .deps
                    .store
                    .mark_failed(&fingerprint, e.to_string())
                    .await
                {
                    error!(
                        "[工作者 {}] ❌ 无法记录失败状态 {}: {}",
                        worker_id,
                        fingerprint.short(),
                        store_err
                    );
                }
                Some(e)
            }
        };

        ProcessingResult {
            job,
            fingerprint,
            status: if error.is_none() {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            },
            title: progress.title,
            artifact_path: progress.artifact_path,
            output_path: progress.output_path,
            from_cache: progress.from_cache,
            duration,
            error,
        }
    }

    async fn execute(
        &self,
        job: &ProcessingJob,
        fingerprint: &Fingerprint,
        worker_id: usize,
        progress: &mut Progress,
    ) -> Result<(), PipelineError> {
        // ========== 3. 缓存 ==========
        let (title, artifact_text) = match self.lookup_cache(fingerprint, worker_id).await {
            Some(entry) => {
                progress.from_cache = true;
                (entry.title, entry.artifact_text)
            }
            // ========== 4. 分析 ==========
            None => {
                let text = self.analyze(job, worker_id).await?;
                (extract_title(&text), text)
            }
        };
        progress.title = Some(title.clone());
        debug!("[工作者 {}] 标题: {}", worker_id, title);

        // ========== 5. 生成 ==========
        let artifact_path = self
            .deps
            .generator
            .generate(&title, &artifact_text)
            .await
            .map_err(|e| PipelineError::Generation(format!("{:#}", e)))?;
        progress.artifact_path = Some(artifact_path.clone());

        // ========== 6. 编译 ==========
        let output_path = self
            .deps
            .compiler
            .compile(&artifact_path)
            .await
            .map_err(|e| PipelineError::Compilation(format!("{:#}", e)))?;
        progress.output_path = Some(output_path.clone());

        // ========== 7. 持久化 ==========
        self.deps
            .store
            .mark_completed(ProcessingRecord::completed(
                fingerprint.clone(),
                &job.file_path,
                &title,
                &artifact_path,
                &output_path,
            ))
            .await?;

        if !progress.from_cache {
            if let Some(cache) = &self.deps.cache {
                let entry = CachedAnalysisEntry::new(
                    fingerprint.clone(),
                    title,
                    artifact_text,
                    self.deps.analyzer.model_identifier(),
                );
                if let Err(e) = cache.set(fingerprint, entry).await {
                    warn!("[工作者 {}] ⚠️ 写入缓存失败（已忽略）: {}", worker_id, e);
                }
            }
        }

        Ok(())
    }

    /// 缓存错误一律降级为未命中
    async fn lookup_cache(
        &self,
        fingerprint: &Fingerprint,
        worker_id: usize,
    ) -> Option<CachedAnalysisEntry> {
        let cache = self.deps.cache.as_ref()?;
        match cache.get(fingerprint).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("[工作者 {}] ⚠️ 缓存不可用，按未命中处理: {}", worker_id, e);
                None
            }
        }
    }

    async fn analyze(&self, job: &ProcessingJob, worker_id: usize) -> Result<String, PipelineError> {
        info!("[工作者 {}] 🤖 分析 {}...", worker_id, job.display_name());
        match tokio::time::timeout(
            self.analysis_timeout,
            self.deps.analyzer.analyze(&job.file_path),
        )
        .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(PipelineError::Analysis(format!("{:#}", e))),
            Err(_) => Err(PipelineError::AnalysisTimeout {
                secs: self.analysis_timeout.as_secs(),
            }),
        }
    }
}
