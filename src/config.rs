//! 程序配置
//!
//! 加载顺序：默认值 → 可选的 TOML 文件 → 环境变量。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};

/// 缓存 TTL 上限（约一百年）
pub const MAX_CACHE_TTL_HOURS: u64 = 24 * 365 * 100;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 待处理 PDF 所在目录
    pub input_dir: PathBuf,
    /// 生成的 .tex 文件目录
    pub tex_output_dir: PathBuf,
    /// 编译后 PDF 报告目录
    pub report_output_dir: PathBuf,
    /// 处理状态文件所在目录
    pub metadata_dir: PathBuf,
    /// 并发工作者数量
    pub max_workers: usize,
    /// 单篇论文分析超时（秒）
    pub timeout_per_paper_secs: u64,
    /// 忽略去重，强制重新处理
    pub force_reprocess: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 运行日志文件
    pub output_log_file: PathBuf,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub llm_max_attempts: u32,
    pub llm_initial_delay_ms: u64,
    // --- LaTeX 配置 ---
    pub latex_compiler: String,
    pub latex_use_latexmk: bool,
    pub latex_clean_aux: bool,
    // --- 缓存配置 ---
    pub cache_enabled: bool,
    /// "memory" 或 "disk"
    pub cache_backend: String,
    pub cache_dir: PathBuf,
    pub cache_ttl_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("lib"),
            tex_output_dir: PathBuf::from("tex_files"),
            report_output_dir: PathBuf::from("reports"),
            metadata_dir: PathBuf::from(".metadata"),
            max_workers: 4,
            timeout_per_paper_secs: 600,
            force_reprocess: false,
            verbose_logging: false,
            output_log_file: PathBuf::from("output.txt"),
            llm_api_key: String::new(),
            llm_api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            llm_model_name: "gemini-2.5-flash".to_string(),
            llm_max_tokens: 8192,
            llm_temperature: 0.3,
            llm_max_attempts: 5,
            llm_initial_delay_ms: 1000,
            latex_compiler: "pdflatex".to_string(),
            latex_use_latexmk: true,
            latex_clean_aux: true,
            cache_enabled: true,
            cache_backend: "disk".to_string(),
            cache_dir: PathBuf::from(".cache"),
            cache_ttl_hours: 24 * 30,
        }
    }
}

impl Config {
    /// 按 默认值 → TOML 文件 → 环境变量 的顺序加载
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(p) if p.exists() => Self::from_toml_file(p)?,
            _ => Self::default(),
        };
        let config = base.overlay_env();
        config.validate()?;
        Ok(config)
    }

    /// 仅从环境变量加载（缺失或无法解析的项使用默认值）
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// 从 TOML 文件加载，缺失字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// 用环境变量覆盖当前配置
    pub fn overlay_env(self) -> Self {
        Self {
            input_dir: env_path("INPUT_DIR").unwrap_or(self.input_dir),
            tex_output_dir: env_path("TEX_OUTPUT_DIR").unwrap_or(self.tex_output_dir),
            report_output_dir: env_path("REPORT_OUTPUT_DIR").unwrap_or(self.report_output_dir),
            metadata_dir: env_path("METADATA_DIR").unwrap_or(self.metadata_dir),
            max_workers: env_parse("MAX_WORKERS").unwrap_or(self.max_workers),
            timeout_per_paper_secs: env_parse("TIMEOUT_PER_PAPER_SECS").unwrap_or(self.timeout_per_paper_secs),
            force_reprocess: env_parse("FORCE_REPROCESS").unwrap_or(self.force_reprocess),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            output_log_file: env_path("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS").unwrap_or(self.llm_max_tokens),
            llm_temperature: env_parse("LLM_TEMPERATURE").unwrap_or(self.llm_temperature),
            llm_max_attempts: env_parse("LLM_MAX_ATTEMPTS").unwrap_or(self.llm_max_attempts),
            llm_initial_delay_ms: env_parse("LLM_INITIAL_DELAY_MS").unwrap_or(self.llm_initial_delay_ms),
            latex_compiler: std::env::var("LATEX_COMPILER").unwrap_or(self.latex_compiler),
            latex_use_latexmk: env_parse("LATEX_USE_LATEXMK").unwrap_or(self.latex_use_latexmk),
            latex_clean_aux: env_parse("LATEX_CLEAN_AUX").unwrap_or(self.latex_clean_aux),
            cache_enabled: env_parse("CACHE_ENABLED").unwrap_or(self.cache_enabled),
            cache_backend: std::env::var("CACHE_BACKEND").unwrap_or(self.cache_backend),
            cache_dir: env_path("CACHE_DIR").unwrap_or(self.cache_dir),
            cache_ttl_hours: env_parse("CACHE_TTL_HOURS").unwrap_or(self.cache_ttl_hours),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> AppResult<()> {
        if self.max_workers == 0 {
            return Err(AppError::invalid_config("max_workers", "必须大于 0"));
        }
        if self.cache_ttl_hours == 0 {
            return Err(AppError::invalid_config("cache_ttl_hours", "必须大于 0"));
        }
        if self.cache_ttl_hours > MAX_CACHE_TTL_HOURS {
            return Err(AppError::invalid_config(
                "cache_ttl_hours",
                format!("不能超过 {} 小时", MAX_CACHE_TTL_HOURS),
            ));
        }
        if !matches!(self.cache_backend.as_str(), "memory" | "disk") {
            return Err(AppError::invalid_config(
                "cache_backend",
                format!("未知的缓存后端 '{}'，可选 memory / disk", self.cache_backend),
            ));
        }
        Ok(())
    }

    /// 以指定并发数覆盖配置（对应命令行的 parallel 参数）
    pub fn with_parallelism(mut self, workers: usize) -> Self {
        if workers > 0 {
            self.max_workers = workers;
        }
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(3600))
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_per_paper_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}
