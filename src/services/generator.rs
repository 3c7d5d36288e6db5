//! LaTeX 文件生成服务
//!
//! 把分析文本写成 `<标题>.tex`，不做任何内容加工。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// 文件名最大长度
const MAX_FILENAME_LEN: usize = 200;
/// 标题清理后为空时使用的文件名
pub const FALLBACK_FILENAME: &str = "paper_analysis";

/// 中间文件生成能力
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// 写入中间文件，返回其路径
    async fn generate(&self, title: &str, artifact_text: &str) -> Result<PathBuf>;
}

/// 写 .tex 文件
pub struct LatexGenerator {
    output_dir: PathBuf,
}

impl LatexGenerator {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl ArtifactGenerator for LatexGenerator {
    async fn generate(&self, title: &str, artifact_text: &str) -> Result<PathBuf> {
        let mut filename = sanitize_filename(title);
        if filename.is_empty() {
            filename = FALLBACK_FILENAME.to_string();
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("无法创建输出目录: {}", self.output_dir.display()))?;

        let path = self.output_dir.join(format!("{}.tex", filename));
        tokio::fs::write(&path, artifact_text)
            .await
            .with_context(|| format!("写入 LaTeX 文件失败: {}", path.display()))?;

        debug!("📝 已生成 {}", path.display());
        Ok(path)
    }
}

/// 只保留字母、数字、`_`、`-`，空格转为 `_`，其余字符丢弃
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => Some(c),
            ' ' => Some('_'),
            _ => None,
        })
        .take(MAX_FILENAME_LEN)
        .collect()
}
