//! 业务能力层（Services）
//!
//! 每个服务只处理一篇论文，不关心流程顺序：
//! - `Analyzer` - 论文分析（LLM）
//! - `ArtifactGenerator` - 写中间 .tex 文件
//! - `Compiler` - 编译为最终 PDF

pub mod analyzer;
pub mod compiler;
pub mod generator;

pub use analyzer::{Analyzer, LlmAnalyzer};
pub use compiler::{Compiler, LatexCompiler};
pub use generator::{ArtifactGenerator, LatexGenerator};
