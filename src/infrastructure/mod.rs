//! 基础设施层（Infrastructure）
//!
//! 持有跨任务共享的资源，只暴露能力：
//! - `fingerprint` - 内容指纹
//! - `state_store` - 持久化的处理状态（唯一的去重同步点）
//! - `cache_backend` / `result_cache` - 带 TTL 的分析结果缓存

pub mod cache_backend;
pub mod fingerprint;
pub mod result_cache;
pub mod state_store;

pub use cache_backend::{CacheBackend, DiskBackend, MemoryBackend};
pub use fingerprint::{fingerprint_bytes, fingerprint_file, Fingerprint};
pub use result_cache::{CachedAnalysisEntry, ResultCache, CACHE_KEY_PREFIX};
pub use state_store::{ProcessingRecord, ProcessingStateStore, ProcessingStatus, StoreStats};
