//! 工具调用 JSON Schema 生成（schemars 自动生成）
//!
//! 拼进执行器提示词的 {tools} 段，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 工具调用请求格式：与 parse_tool_call 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，取自下方可用工具列表
    pub tool: String,
    /// 工具参数，结构见各工具的 input_schema
    pub args: HashMap<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_tool_and_args() {
        let schema: serde_json::Value = serde_json::from_str(&tool_call_schema_json()).unwrap();
        let props = &schema["properties"];
        assert!(props.get("tool").is_some());
        assert!(props.get("args").is_some());
    }
}
