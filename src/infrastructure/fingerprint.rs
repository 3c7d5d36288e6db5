//! 文件指纹
//!
//! 对文件内容做 SHA-256，作为缓存与状态记录的统一键。只看内容，
//! 与路径、文件名、修改时间无关。

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::PipelineError;

const CHUNK_SIZE: usize = 64 * 1024;
const PLACEHOLDER_PREFIX: &str = "temp_";

static PLACEHOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// 内容指纹（小写十六进制）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// 由已知的十六进制摘要构造
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// 本次运行内唯一的占位身份
    ///
    /// 仅在无法读取文件时使用。前缀保证不会与任何十六进制摘要相同，
    /// 调用方不得把它写入缓存或状态存储。
    pub fn placeholder() -> Self {
        let seq = PLACEHOLDER_SEQ.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self(format!("{}{}_{}_{}", PLACEHOLDER_PREFIX, std::process::id(), nanos, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用的短指纹
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 计算文件内容指纹
pub async fn fingerprint_file(path: &Path) -> Result<Fingerprint, PipelineError> {
    let to_err = |source| PipelineError::Fingerprint {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).await.map_err(to_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await.map_err(to_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// 计算内存中字节的指纹（测试与工具函数使用）
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint(hex::encode(Sha256::digest(bytes)))
}
