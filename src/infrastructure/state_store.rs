//! 处理状态存储
//!
//! 指纹 → 最近一次处理记录 的持久化映射。每次修改都在返回前把整张表写回磁盘；
//! 所有操作由同一把读写锁串行化，`try_mark_processing` 在一次写锁内完成
//! "检查 + 写入"，这是防止同一指纹被并发重复处理的唯一同步点。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::infrastructure::fingerprint::Fingerprint;

/// 状态文件名
pub const STATE_FILE_NAME: &str = "hashes.json";

const STORE_VERSION: &str = "1.0";
const INTERRUPTED_MESSAGE: &str = "interrupted: previous run stopped before this attempt finished";

/// 处理状态（没有记录即"从未尝试"）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

/// 单个指纹最近一次尝试的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub file_path: PathBuf,
    #[serde(alias = "file_hash")]
    pub fingerprint: Fingerprint,
    #[serde(default, alias = "paper_title")]
    pub title: String,
    pub processed_at: DateTime<Utc>,
    #[serde(default, alias = "tex_file", skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, alias = "report_file", skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub status: ProcessingStatus,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProcessingRecord {
    fn processing(fingerprint: &Fingerprint, file_path: &Path) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            fingerprint: fingerprint.clone(),
            title: String::new(),
            processed_at: Utc::now(),
            artifact_path: None,
            output_path: None,
            status: ProcessingStatus::Processing,
            error_message: None,
        }
    }

    /// 构造一条待写入的完成记录（时间戳与状态由 `mark_completed` 填写）
    pub fn completed(
        fingerprint: Fingerprint,
        file_path: impl Into<PathBuf>,
        title: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            fingerprint,
            title: title.into(),
            processed_at: Utc::now(),
            artifact_path: Some(artifact_path.into()),
            output_path: Some(output_path.into()),
            status: ProcessingStatus::Completed,
            error_message: None,
        }
    }
}

/// 各状态的记录数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub completed: usize,
    pub failed: usize,
    pub processing: usize,
}

/// 磁盘上的完整布局
#[derive(Debug, Serialize, Deserialize)]
struct StoreState {
    version: String,
    last_updated: DateTime<Utc>,
    #[serde(default, alias = "processed_papers")]
    records: BTreeMap<Fingerprint, ProcessingRecord>,
}

impl StoreState {
    fn empty() -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            last_updated: Utc::now(),
            records: BTreeMap::new(),
        }
    }
}

/// 认领模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimMode {
    /// 已完成或处理中都视为占用
    Fresh,
    /// 强制重处理：只有处理中的记录会阻止认领
    Force,
}

/// 处理状态存储
///
/// 以显式对象传入工作池与编排器，不使用全局状态，
/// 因此测试中可以并行运行多个互不影响的实例。
pub struct ProcessingStateStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl ProcessingStateStore {
    /// 打开（或创建）`metadata_dir` 下的状态文件
    ///
    /// - 文件不存在：创建空存储并立即写盘
    /// - 文件为空：重新初始化
    /// - 内容无法解析：直接报错，不丢弃历史
    pub async fn open(metadata_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = metadata_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;

        let path = dir.join(STATE_FILE_NAME);
        let loaded = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {
                warn!("⚠️ 状态文件为空，重新初始化: {}", path.display());
                None
            }
            Ok(bytes) => {
                let state: StoreState =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                Some(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        let state = match loaded {
            Some(state) => {
                info!(
                    "✓ 已加载处理状态: {} 条记录 ({})",
                    state.records.len(),
                    path.display()
                );
                state
            }
            None => {
                let mut state = StoreState::empty();
                persist(&path, &mut state).await?;
                info!("✓ 已创建处理状态文件: {}", path.display());
                state
            }
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// 状态文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 原子地认领一个指纹
    ///
    /// 已有记录为 `completed` 或 `processing` 时返回 `false` 且不修改状态；
    /// 否则写入 `processing` 记录、落盘并返回 `true`。
    pub async fn try_mark_processing(
        &self,
        fingerprint: &Fingerprint,
        file_path: &Path,
    ) -> Result<bool, StoreError> {
        self.claim(fingerprint, file_path, ClaimMode::Fresh).await
    }

    /// 强制重处理时的认领：只有正在处理中的记录会阻止认领
    pub async fn try_mark_reprocessing(
        &self,
        fingerprint: &Fingerprint,
        file_path: &Path,
    ) -> Result<bool, StoreError> {
        self.claim(fingerprint, file_path, ClaimMode::Force).await
    }

    async fn claim(
        &self,
        fingerprint: &Fingerprint,
        file_path: &Path,
        mode: ClaimMode,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.records.get(fingerprint) {
            let blocked = match existing.status {
                ProcessingStatus::Processing => true,
                ProcessingStatus::Completed => mode == ClaimMode::Fresh,
                ProcessingStatus::Failed => false,
            };
            if blocked {
                debug!(
                    "指纹 {} 已被占用 (状态: {:?})",
                    fingerprint.short(),
                    existing.status
                );
                return Ok(false);
            }
        }

        let previous = state.records.insert(
            fingerprint.clone(),
            ProcessingRecord::processing(fingerprint, file_path),
        );

        if let Err(e) = persist(&self.path, &mut state).await {
            // 落盘失败时撤销认领，避免内存里残留一个永远不会结束的 processing
            match previous {
                Some(record) => state.records.insert(fingerprint.clone(), record),
                None => state.records.remove(fingerprint),
            };
            return Err(e);
        }

        Ok(true)
    }

    /// 无条件标记为处理中
    pub async fn mark_processing(
        &self,
        fingerprint: &Fingerprint,
        file_path: &Path,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.records.insert(
            fingerprint.clone(),
            ProcessingRecord::processing(fingerprint, file_path),
        );
        persist(&self.path, &mut state).await
    }

    /// 标记为完成（覆盖之前的任何状态）
    pub async fn mark_completed(&self, mut record: ProcessingRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        record.processed_at = Utc::now();
        record.status = ProcessingStatus::Completed;
        record.error_message = None;
        state.records.insert(record.fingerprint.clone(), record);
        persist(&self.path, &mut state).await
    }

    /// 标记为失败（覆盖之前的任何状态，包括 completed）
    pub async fn mark_failed(
        &self,
        fingerprint: &Fingerprint,
        error_message: impl Into<String>,
    ) -> Result<(), StoreError> {
        let error_message = error_message.into();
        let mut state = self.state.write().await;
        let now = Utc::now();

        state
            .records
            .entry(fingerprint.clone())
            .and_modify(|record| {
                record.status = ProcessingStatus::Failed;
                record.processed_at = now;
                record.error_message = Some(error_message.clone());
            })
            .or_insert_with(|| ProcessingRecord {
                file_path: PathBuf::new(),
                fingerprint: fingerprint.clone(),
                title: String::new(),
                processed_at: now,
                artifact_path: None,
                output_path: None,
                status: ProcessingStatus::Failed,
                error_message: Some(error_message.clone()),
            });

        persist(&self.path, &mut state).await
    }

    /// 是否已成功处理（仅 `completed` 算）
    pub async fn is_processed(&self, fingerprint: &Fingerprint) -> bool {
        let state = self.state.read().await;
        matches!(
            state.records.get(fingerprint).map(|r| r.status),
            Some(ProcessingStatus::Completed)
        )
    }

    /// 已完成或正在处理中
    pub async fn is_processed_or_processing(&self, fingerprint: &Fingerprint) -> bool {
        let state = self.state.read().await;
        matches!(
            state.records.get(fingerprint).map(|r| r.status),
            Some(ProcessingStatus::Completed | ProcessingStatus::Processing)
        )
    }

    pub async fn get_record(&self, fingerprint: &Fingerprint) -> Option<ProcessingRecord> {
        self.state.read().await.records.get(fingerprint).cloned()
    }

    pub async fn get_all_records(&self) -> Vec<ProcessingRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        state
            .records
            .values()
            .fold(StoreStats::default(), |mut stats, record| {
                match record.status {
                    ProcessingStatus::Completed => stats.completed += 1,
                    ProcessingStatus::Failed => stats.failed += 1,
                    ProcessingStatus::Processing => stats.processing += 1,
                }
                stats
            })
    }

    /// 把上次运行遗留的 `processing` 记录改为 `failed`，使其可以重试
    ///
    /// 只应在启动时、任何工作者开始之前调用。
    ///
    /// 存储是每个进程各自的快照，进程之间没有互斥：如果另一个进程正在使用
    /// 同一个元数据目录，它进行中的记录也会被改为 `failed`，之后可能被重复处理。
    /// 同一目录同一时间只应有一个进程在运行。
    pub async fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut recovered = 0;

        for record in state.records.values_mut() {
            if record.status == ProcessingStatus::Processing {
                record.status = ProcessingStatus::Failed;
                record.processed_at = now;
                record.error_message = Some(INTERRUPTED_MESSAGE.to_string());
                recovered += 1;
            }
        }

        if recovered > 0 {
            persist(&self.path, &mut state).await?;
            warn!("⚠️ 发现 {} 条中断的处理记录，已标记为失败以便重试", recovered);
        }

        Ok(recovered)
    }
}

/// 整表写回磁盘：先写临时文件再重命名，崩溃时不会留下半截文件
async fn persist(path: &Path, state: &mut StoreState) -> Result<(), StoreError> {
    state.last_updated = Utc::now();
    let data = serde_json::to_vec_pretty(&*state).map_err(StoreError::Serialize)?;

    let tmp_path = path.with_extension("json.tmp");
    let to_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp_path, &data).await.map_err(to_err)?;
    fs::rename(&tmp_path, path).await.map_err(to_err)?;
    Ok(())
}
