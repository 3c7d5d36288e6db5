//! 从分析文本中提取论文标题
//!
//! 尽力而为：提取不到就用固定的默认标题，从不报错。

use regex::Regex;

/// 提取失败时的标题
pub const DEFAULT_TITLE: &str = "Unknown Paper";

const PATTERNS: &[&str] = &[r"\\title\{([^}]*)\}", r"\\(?:sub)?section\*?\{([^}]*)\}"];

/// 依次尝试 `\title{}` 和第一个 `\section{}` / `\subsection{}`
pub fn extract_title(latex: &str) -> String {
    for pattern in PATTERNS {
        if let Ok(re) = Regex::new(pattern) {
            let found = re
                .captures(latex)
                .and_then(|caps| caps.get(1))
                .map(|m| clean(m.as_str()))
                .filter(|t| !t.is_empty());
            if let Some(title) = found {
                return title;
            }
        }
    }
    DEFAULT_TITLE.to_string()
}

fn clean(raw: &str) -> String {
    raw.replace('\\', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
