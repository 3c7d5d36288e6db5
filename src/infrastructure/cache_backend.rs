//! 带 TTL 的键值后端
//!
//! 结果缓存只依赖 [`CacheBackend`] 这一最小接口（get / set_ex / del / keys），
//! 与外部键值服务的命令一一对应。这里提供两个实现：进程内的
//! [`MemoryBackend`] 和每个键一个文件的 [`DiskBackend`]。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::CacheError;

/// 键值后端
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 读取；不存在或已过期返回 `None`
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// 写入并设置过期时间
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// 删除；返回键是否存在
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// 列出指定前缀下所有未过期的键
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

// ========== 内存后端 ==========

/// 进程内后端，过期在读取时判定
#[derive(Default)]
pub struct MemoryBackend {
    /// 过期时刻为 `None` 表示 TTL 超出 `Instant` 的表示范围，视为永不过期
    data: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |t| now < t)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|(_, expires_at)| is_live(*expires_at, Instant::now()))
            .map(|(value, _)| value.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        data.retain(|_, (_, expires_at)| is_live(*expires_at, now));
        data.insert(key.to_string(), (value, now.checked_add(ttl)));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut data = self.data.write().await;
        Ok(data
            .remove(key)
            .is_some_and(|(_, expires_at)| is_live(expires_at, Instant::now())))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(data
            .iter()
            .filter(|(key, (_, expires_at))| key.starts_with(prefix) && is_live(*expires_at, now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

// ========== 磁盘后端 ==========

/// 磁盘上的单个条目
#[derive(Debug, Serialize, Deserialize)]
struct DiskEnvelope {
    key: String,
    value: String,
    expires_at: DateTime<Utc>,
}

/// 每个键一个 JSON 文件，跨进程保留；过期文件在访问时清理
pub struct DiskBackend {
    base_path: PathBuf,
}

impl DiskBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.base_path.join(format!("{}.json", safe_key))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
        move |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// 读取并解析条目；文件不存在返回 `None`
    async fn read_envelope(&self, path: &Path) -> Result<Option<DiskEnvelope>, CacheError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(path)(e)),
        };
        let envelope: DiskEnvelope =
            serde_json::from_str(&content).map_err(|source| CacheError::Decode {
                key: path.display().to_string(),
                source,
            })?;
        Ok(Some(envelope))
    }

    async fn remove_quietly(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("无法删除过期缓存文件 {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.key_path(key);
        match self.read_envelope(&path).await? {
            Some(envelope) if envelope.expires_at > Utc::now() => Ok(Some(envelope.value)),
            Some(_) => {
                debug!("缓存已过期: {}", key);
                Self::remove_quietly(&path).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(Self::io_err(&self.base_path))?;

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let envelope = DiskEnvelope {
            key: key.to_string(),
            value,
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let data = serde_json::to_vec(&envelope).map_err(CacheError::Encode)?;

        let path = self.key_path(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data).await.map_err(Self::io_err(&tmp_path))?;
        fs::rename(&tmp_path, &path).await.map_err(Self::io_err(&path))?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.key_path(key);
        let live = matches!(
            self.read_envelope(&path).await,
            Ok(Some(ref envelope)) if envelope.expires_at > Utc::now()
        );
        match fs::remove_file(&path).await {
            Ok(()) => Ok(live),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&self.base_path)(e)),
        };

        let now = Utc::now();
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(Self::io_err(&self.base_path))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_envelope(&path).await {
                Ok(Some(envelope)) if envelope.expires_at <= now => {
                    Self::remove_quietly(&path).await;
                }
                Ok(Some(envelope)) if envelope.key.starts_with(prefix) => keys.push(envelope.key),
                Ok(_) => {}
                Err(e) => warn!("跳过无法读取的缓存文件 {}: {}", path.display(), e),
            }
        }

        Ok(keys)
    }
}
