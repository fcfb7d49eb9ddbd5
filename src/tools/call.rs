//! 步骤输出中的 Tool Call 解析
//!
//! 约定格式：`{"tool": "read_file", "args": {"path": "..."}}`，可包在 ```json 代码块里。
//! 解析不出合法调用（无 JSON、JSON 不合法、tool 为空）时一律视为普通回答。

use serde::{Deserialize, Serialize};

/// LLM 发起的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::json!({})
}

/// 从文本中提取 JSON 调用；None 表示这是一段普通回答
pub fn parse_tool_call(output: &str) -> Option<ToolCall> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end < start {
            return None;
        }
        &trimmed[start..=end]
    };

    let parsed: ToolCall = match serde_json::from_str(json_str) {
        Ok(call) => call,
        Err(e) => {
            tracing::debug!("step output is not a tool call: {}", e);
            return None;
        }
    };
    if parsed.tool.trim().is_empty() {
        None
    } else {
        Some(parsed)
    }
}
