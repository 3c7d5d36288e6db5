//! 结果缓存
//!
//! 指纹 → 已验证的分析结果。只在编译成功之后写入，所以命中即代表
//! 之前完整跑通过一次流水线。任何缓存错误对调用方都不是致命的。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CacheError;
use crate::infrastructure::cache_backend::{CacheBackend, DiskBackend, MemoryBackend};
use crate::infrastructure::fingerprint::Fingerprint;

/// 缓存键前缀
pub const CACHE_KEY_PREFIX: &str = "archivist:analysis:";

/// 缓存的分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysisEntry {
    pub fingerprint: Fingerprint,
    pub title: String,
    pub artifact_text: String,
    pub model_identifier: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedAnalysisEntry {
    pub fn new(
        fingerprint: Fingerprint,
        title: impl Into<String>,
        artifact_text: impl Into<String>,
        model_identifier: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint,
            title: title.into(),
            artifact_text: artifact_text.into(),
            model_identifier: model_identifier.into(),
            cached_at: Utc::now(),
        }
    }

    /// 缓存至今的时长（小时）
    pub fn age_hours(&self) -> f64 {
        (Utc::now() - self.cached_at).num_seconds() as f64 / 3600.0
    }
}

/// 结果缓存
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// 按配置创建；未启用缓存时返回 `None`
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.cache_enabled {
            return None;
        }
        let backend: Arc<dyn CacheBackend> = match config.cache_backend.as_str() {
            "memory" => Arc::new(MemoryBackend::new()),
            _ => Arc::new(DiskBackend::new(&config.cache_dir)),
        };
        Some(Self::new(backend, config.cache_ttl()))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(fingerprint: &Fingerprint) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, fingerprint)
    }

    /// 查询缓存；未命中返回 `Ok(None)`
    pub async fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<CachedAnalysisEntry>, CacheError> {
        let key = Self::key(fingerprint);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };

        let entry: CachedAnalysisEntry =
            serde_json::from_str(&raw).map_err(|source| CacheError::Decode { key, source })?;

        info!(
            "🎯 缓存命中: {} (缓存于 {:.1} 小时前)",
            fingerprint.short(),
            entry.age_hours()
        );
        Ok(Some(entry))
    }

    /// 写入缓存；以参数中的指纹为准并刷新缓存时间
    pub async fn set(
        &self,
        fingerprint: &Fingerprint,
        mut entry: CachedAnalysisEntry,
    ) -> Result<(), CacheError> {
        entry.fingerprint = fingerprint.clone();
        entry.cached_at = Utc::now();

        let value = serde_json::to_string(&entry).map_err(CacheError::Encode)?;
        self.backend
            .set_ex(&Self::key(fingerprint), value, self.ttl)
            .await?;

        info!(
            "💾 已缓存分析结果: {} (TTL: {} 小时)",
            fingerprint.short(),
            self.ttl.as_secs() / 3600
        );
        Ok(())
    }

    pub async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        Ok(self.backend.get(&Self::key(fingerprint)).await?.is_some())
    }

    /// 删除单条缓存；条目不存在时返回 `NotFound`
    pub async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        if !self.backend.del(&Self::key(fingerprint)).await? {
            return Err(CacheError::NotFound(fingerprint.to_string()));
        }
        info!("🗑️ 已删除缓存: {}", fingerprint.short());
        Ok(())
    }

    /// 清空本前缀下的全部缓存，返回删除数量
    pub async fn clear_all(&self) -> Result<usize, CacheError> {
        let keys = self.backend.keys(CACHE_KEY_PREFIX).await?;
        let mut deleted = 0;
        for key in &keys {
            if self.backend.del(key).await? {
                deleted += 1;
            }
        }
        debug!("清空缓存: 删除 {} / {} 个键", deleted, keys.len());
        Ok(deleted)
    }

    /// 列出所有缓存条目；无法解码的条目跳过
    pub async fn list_all(&self) -> Result<Vec<CachedAnalysisEntry>, CacheError> {
        let keys = self.backend.keys(CACHE_KEY_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());

        for key in keys {
            let raw = match self.backend.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("读取缓存 {} 失败: {}", key, e);
                    continue;
                }
            };
            match serde_json::from_str::<CachedAnalysisEntry>(&raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("解析缓存 {} 失败: {}", key, e),
            }
        }

        entries.sort_by(|a, b| b.cached_at.cmp(&a.cached_at));
        Ok(entries)
    }

    pub async fn count_entries(&self) -> Result<usize, CacheError> {
        Ok(self.backend.keys(CACHE_KEY_PREFIX).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::fingerprint::fingerprint_bytes;

    fn memory_cache() -> ResultCache {
        ResultCache::new(Arc::new(MemoryBackend::new()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_miss_is_not_an_error() {
        let cache = memory_cache();
        assert!(cache.get(&fingerprint_bytes(b"nothing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = memory_cache();
        let fp = fingerprint_bytes(b"paper");
        let entry = CachedAnalysisEntry::new(
            Fingerprint::from_hex("ignored"),
            "Attention Is All You Need",
            "\\title{Attention Is All You Need}",
            "gemini-2.5-flash",
        );

        cache.set(&fp, entry).await.unwrap();
        let hit = cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(hit.fingerprint, fp);
        assert_eq!(hit.title, "Attention Is All You Need");
        assert!(cache.exists(&fp).await.unwrap());

        cache.delete(&fp).await.unwrap();
        assert!(matches!(
            cache.delete(&fp).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_list_count_only_touch_prefix() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set_ex("unrelated:key", "x".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = ResultCache::new(backend.clone(), Duration::from_secs(60));

        for tag in ["a", "b", "c"] {
            let fp = fingerprint_bytes(tag.as_bytes());
            cache
                .set(&fp, CachedAnalysisEntry::new(fp.clone(), tag, "tex", "model"))
                .await
                .unwrap();
        }

        assert_eq!(cache.count_entries().await.unwrap(), 3);
        assert_eq!(cache.list_all().await.unwrap().len(), 3);
        assert_eq!(cache.clear_all().await.unwrap(), 3);
        assert_eq!(cache.count_entries().await.unwrap(), 0);
        assert!(backend.get("unrelated:key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_undecodable_value_is_decode_error() {
        let backend = Arc::new(MemoryBackend::new());
        let fp = fingerprint_bytes(b"garbage");
        backend
            .set_ex(
                &format!("{}{}", CACHE_KEY_PREFIX, fp),
                "not json".to_string(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let cache = ResultCache::new(backend, Duration::from_secs(60));

        assert!(matches!(
            cache.get(&fp).await,
            Err(CacheError::Decode { .. })
        ));
        // 列表时跳过坏条目
        assert!(cache.list_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_from_config_respects_enabled_flag() {
        let disabled = Config {
            cache_enabled: false,
            ..Default::default()
        };
        assert!(ResultCache::from_config(&disabled).is_none());

        let enabled = Config {
            cache_backend: "memory".to_string(),
            cache_ttl_hours: 2,
            ..Default::default()
        };
        let cache = ResultCache::from_config(&enabled).unwrap();
        assert_eq!(cache.ttl(), Duration::from_secs(7200));
    }
}
