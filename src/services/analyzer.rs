//! 论文分析服务 - 业务能力层
//!
//! 只负责"把一篇 PDF 变成 LaTeX 分析文档"，不关心去重、缓存和状态。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - PDF 以 `data:application/pdf;base64,...` 的形式内联到多模态消息中
//! - 兼容 OpenAI API 的服务（如 Gemini, Doubao 等）

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, info, warn};

use crate::config::Config;

/// 分析能力
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// 分析一篇论文，返回 LaTeX 文本
    async fn analyze(&self, pdf_path: &Path) -> Result<String>;

    /// 写入缓存条目的模型标识
    fn model_identifier(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You are an expert in AI/ML research who explains papers to computer \
science students. You answer with a single complete LaTeX document and nothing else.";

const ANALYSIS_PROMPT: &str = r"Analyze the attached research paper and write a comprehensive, student-friendly LaTeX document.

Output requirements:
1. Output ONLY valid LaTeX code, nothing else
2. Start with \documentclass[11pt,a4paper]{article} and end with \end{document}
3. NO markdown code blocks and NO explanatory text before or after the document
4. Use only standard packages: amsmath, amssymb, graphicx, hyperref, xcolor, geometry, tcolorbox, enumitem
5. Set \title{} to the paper's actual title

Required sections, in this order:
- Executive Summary
- Problem Statement and Motivation
- Prerequisites (what a student must know first)
- Methodology, explained step by step with the key equations
- Key Insights and Breakthroughs
- Experimental Results
- Limitations and Future Work
- Glossary of terms";

/// 基于 LLM 的分析服务
pub struct LlmAnalyzer {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
    max_attempts: u32,
    initial_delay: Duration,
}

impl LlmAnalyzer {
    /// 创建新的分析服务
    pub fn new(config: &Config) -> Self {
        // 兼容 OpenAI API 的服务
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
            max_attempts: config.llm_max_attempts.max(1),
            initial_delay: Duration::from_millis(config.llm_initial_delay_ms),
        }
    }

    /// 单次调用：文本指令 + 内联 PDF
    async fn request_once(&self, pdf_data_url: &str) -> Result<String> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: ANALYSIS_PROMPT.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: pdf_data_url.to_string(),
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| anyhow::anyhow!("LLM API 调用失败: {}", e))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(&self, pdf_path: &Path) -> Result<String> {
        let pdf_bytes = tokio::fs::read(pdf_path)
            .await
            .with_context(|| format!("读取 PDF 失败: {}", pdf_path.display()))?;
        let data_url = pdf_data_url(&pdf_bytes);

        info!(
            "🤖 调用 LLM 分析 ({}, {} KB)",
            self.model_name,
            pdf_bytes.len() / 1024
        );

        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.request_once(&data_url).await {
                Ok(raw) => {
                    let latex = clean_latex_output(&raw);
                    debug!("LLM 返回 {} 字符 (清理后 {})", raw.len(), latex.len());
                    return Ok(latex);
                }
                Err(e) => {
                    warn!("⚠️ 第 {}/{} 次分析失败: {}", attempt, self.max_attempts, e);
                    last_err = Some(e);
                }
            }

            if attempt < self.max_attempts {
                let delay = backoff_delay(self.initial_delay, attempt);
                debug!("{} 毫秒后重试", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("未发起任何请求"));
        Err(err.context(format!("分析失败，已重试 {} 次", self.max_attempts)))
    }

    fn model_identifier(&self) -> &str {
        &self.model_name
    }
}

/// 将 PDF 字节编码为 data URL
pub fn pdf_data_url(bytes: &[u8]) -> String {
    format!(
        "data:application/pdf;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// 第 `attempt` 次失败后的等待时间：initial * 2^(attempt-1)
fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16))
}

/// 清理 LLM 输出
///
/// 去掉 Markdown 代码块标记和文档前后的说明文字。
pub fn clean_latex_output(content: &str) -> String {
    let content = content
        .replace("```latex", "")
        .replace("```tex", "")
        .replace("```", "");

    let start = ["\\documentclass", "\\begin{document}", "\\title{"]
        .iter()
        .find_map(|marker| content.find(marker));
    let content = match start {
        Some(i) => &content[i..],
        None => content.as_str(),
    };

    // \end{document} 之后的内容一律丢弃
    let content = match content.rfind("\\end{document}") {
        Some(i) => &content[..i + "\\end{document}".len()],
        None => content,
    };

    content.trim().to_string()
}
