//! 任务与结果
//!
//! 封装"我正在处理哪篇论文"以及"处理得怎么样"

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::infrastructure::Fingerprint;

/// 单篇论文的处理任务
///
/// 由编排层创建，入队后只归一个工作者所有
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    /// PDF 路径
    pub file_path: PathBuf,
    /// 内容指纹（编排层已计算时预先填入，否则由流程层补齐）
    pub fingerprint: Option<Fingerprint>,
    /// 优先级（保留字段，队列按提交顺序处理）
    pub priority: i32,
    /// 强制重新处理
    pub force: bool,
}

impl ProcessingJob {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            fingerprint: None,
            priority: 0,
            force: false,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// 日志里显示的文件名
    pub fn display_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

impl Display for ProcessingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.fingerprint {
            Some(fp) => write!(f, "[{} #{}]", self.display_name(), fp.short()),
            None => write!(f, "[{}]", self.display_name()),
        }
    }
}

/// 任务结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// 全流程成功
    Completed,
    /// 某个阶段失败，记录已标记为 failed
    Failed,
    /// 抢占失败（同一指纹已有进行中或已完成的尝试），未做任何事
    Abandoned,
}

/// 单个任务的处理结果，每个被接受的任务恰好产生一个
#[derive(Debug)]
pub struct ProcessingResult {
    pub job: ProcessingJob,
    pub fingerprint: Fingerprint,
    pub status: JobStatus,
    pub title: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    /// 分析结果来自缓存
    pub from_cache: bool,
    pub duration: Duration,
    pub error: Option<PipelineError>,
}

impl ProcessingResult {
    pub(crate) fn abandoned(job: ProcessingJob, fingerprint: Fingerprint, duration: Duration) -> Self {
        Self {
            job,
            fingerprint,
            status: JobStatus::Abandoned,
            title: None,
            artifact_path: None,
            output_path: None,
            from_cache: false,
            duration,
            error: None,
        }
    }

    pub(crate) fn failed(
        job: ProcessingJob,
        fingerprint: Fingerprint,
        error: PipelineError,
        duration: Duration,
    ) -> Self {
        Self {
            job,
            fingerprint,
            status: JobStatus::Failed,
            title: None,
            artifact_path: None,
            output_path: None,
            from_cache: false,
            duration,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn file_path(&self) -> &Path {
        &self.job.file_path
    }
}
