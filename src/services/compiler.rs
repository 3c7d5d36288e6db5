//! LaTeX 编译服务
//!
//! 调用外部 latexmk / pdflatex 进程。每次编译要么产出 PDF，要么报错。

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;

const AUX_EXTENSIONS: &[&str] = &["aux", "log", "out", "toc", "fdb_latexmk", "fls", "synctex.gz"];
const MANUAL_PASSES: usize = 3;

/// 编译能力
#[async_trait]
pub trait Compiler: Send + Sync {
    /// 编译中间文件，返回最终输出路径
    async fn compile(&self, artifact_path: &Path) -> Result<PathBuf>;
}

/// LaTeX → PDF
pub struct LatexCompiler {
    engine: String,
    use_latexmk: bool,
    clean_aux: bool,
    output_dir: PathBuf,
}

impl LatexCompiler {
    pub fn new(
        engine: impl Into<String>,
        use_latexmk: bool,
        clean_aux: bool,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            engine: engine.into(),
            use_latexmk,
            clean_aux,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.latex_compiler.clone(),
            config.latex_use_latexmk,
            config.latex_clean_aux,
            &config.report_output_dir,
        )
    }

    /// 检查编译工具链是否可用
    pub async fn check_dependencies(&self) -> Result<()> {
        if self.use_latexmk {
            check_command("latexmk").await?;
        }
        check_command(&self.engine).await
    }

    async fn run_latexmk(&self, work_dir: &Path, tex_file: &str) -> Result<()> {
        debug!("运行 latexmk: {}", tex_file);
        let output = Command::new("latexmk")
            .args(["-pdf", "-interaction=nonstopmode", "-halt-on-error", tex_file])
            .current_dir(work_dir)
            .output()
            .await
            .context("无法启动 latexmk")?;

        if !output.status.success() {
            bail!("latexmk 编译失败 ({}):\n{}", output.status, tail(&output.stdout));
        }
        Ok(())
    }

    async fn run_engine_passes(&self, work_dir: &Path, tex_file: &str) -> Result<()> {
        for pass in 1..=MANUAL_PASSES {
            debug!("运行 {} 第 {}/{} 遍", self.engine, pass, MANUAL_PASSES);
            let output = Command::new(&self.engine)
                .args(["-interaction=nonstopmode", "-halt-on-error", tex_file])
                .current_dir(work_dir)
                .output()
                .await
                .with_context(|| format!("无法启动 {}", self.engine))?;

            if !output.status.success() {
                bail!(
                    "{} 第 {} 遍编译失败 ({}):\n{}",
                    self.engine,
                    pass,
                    output.status,
                    tail(&output.stdout)
                );
            }
        }
        Ok(())
    }

    async fn clean_auxiliary_files(&self, work_dir: &Path, base_name: &str) {
        let mut cleaned = 0;
        for ext in AUX_EXTENSIONS {
            let aux = work_dir.join(format!("{}.{}", base_name, ext));
            if tokio::fs::remove_file(&aux).await.is_ok() {
                cleaned += 1;
            }
        }
        debug!("🧹 清理了 {} 个辅助文件", cleaned);
    }
}

#[async_trait]
impl Compiler for LatexCompiler {
    async fn compile(&self, tex_path: &Path) -> Result<PathBuf> {
        let work_dir = tex_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tex_file = tex_path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("非法的 tex 路径: {}", tex_path.display()))?;
        let base_name = tex_file.strip_suffix(".tex").unwrap_or(tex_file);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("无法创建输出目录: {}", self.output_dir.display()))?;

        let start = Instant::now();
        if self.use_latexmk {
            self.run_latexmk(work_dir, tex_file).await?;
        } else {
            self.run_engine_passes(work_dir, tex_file).await?;
        }

        let compiled = work_dir.join(format!("{}.pdf", base_name));
        let output = self.output_dir.join(format!("{}.pdf", base_name));
        tokio::fs::rename(&compiled, &output)
            .await
            .with_context(|| format!("无法移动 PDF 到 {}", output.display()))?;

        if self.clean_aux {
            self.clean_auxiliary_files(work_dir, base_name).await;
        }

        info!("📄 编译完成 {} ({:.2}s)", output.display(), start.elapsed().as_secs_f64());
        Ok(output)
    }
}

/// `<cmd> --version` 成功即视为可用
async fn check_command(cmd: &str) -> Result<()> {
    let status = Command::new(cmd)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("未找到 {}，请先安装 LaTeX 工具链", cmd))?
        .status;
    if !status.success() {
        warn!("{} --version 返回 {}", cmd, status);
        bail!("{} 不可用", cmd);
    }
    Ok(())
}

/// 编译日志只保留最后 20 行
fn tail(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(20)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_last_lines() {
        let log: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        let t = tail(log.as_bytes());
        assert!(t.starts_with("line 11"));
        assert!(t.ends_with("line 30"));
    }

    #[tokio::test]
    async fn test_missing_engine_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("doc.tex");
        tokio::fs::write(&tex, "\\documentclass{article}").await.unwrap();

        let compiler = LatexCompiler::new("no-such-latex-engine", false, true, dir.path());
        assert!(compiler.compile(&tex).await.is_err());
        assert!(compiler.check_dependencies().await.is_err());
    }

    /// 需要本机安装 LaTeX
    #[tokio::test]
    #[ignore]
    async fn test_compile_real_document() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("hello.tex");
        tokio::fs::write(
            &tex,
            "\\documentclass{article}\\begin{document}Hello\\end{document}",
        )
        .await
        .unwrap();

        let compiler = LatexCompiler::new("pdflatex", false, true, dir.path().join("out"));
        let pdf = compiler.compile(&tex).await.unwrap();
        assert!(pdf.exists());
        assert!(!dir.path().join("hello.aux").exists());
    }
}
