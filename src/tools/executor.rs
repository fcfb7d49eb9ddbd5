//! 工具执行器
//!
//! 持有 ToolInvoker（通常是 ToolServerManager），为执行器提示词生成 {tools} 段，
//! execute(call) 调用工具并输出结构化审计日志（JSON）。调用本身从不失败：错误已由 invoker 转成描述文本。

use std::sync::Arc;
use std::time::Instant;

use crate::tools::{tool_call_schema_json, ToolCall, ToolInvoker};

pub struct ToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    /// 执行器提示词中的可用工具段；没有任何工具时返回空串
    pub async fn prompt_section(&self) -> String {
        let tools = self.invoker.function_tools().await;
        if tools.is_empty() {
            return String::new();
        }

        let mut section = String::from("\n可用工具（需要时只输出一个 JSON 工具调用，不要输出其他内容）：\n");
        for t in &tools {
            section.push_str(&format!(
                "- {}: {}\n  参数: {}\n",
                t.function.name, t.function.description, t.function.parameters
            ));
        }
        section.push_str("工具调用格式（JSON Schema）：\n");
        section.push_str(&tool_call_schema_json());
        section.push('\n');
        section
    }

    /// 调用工具并记录审计日志
    pub async fn execute(&self, call: &ToolCall) -> String {
        let start = Instant::now();
        let args_preview = preview(&call.args.to_string(), 200);
        let output = self.invoker.call_tool(&call.tool, call.args.clone()).await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.tool,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
            "output_chars": output.chars().count(),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        output
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::FunctionTool;
    use async_trait::async_trait;

    struct EchoInvoker {
        tools: Vec<FunctionTool>,
    }

    #[async_trait]
    impl ToolInvoker for EchoInvoker {
        async fn call_tool(&self, name: &str, args: serde_json::Value) -> String {
            format!("{} <- {}", name, args)
        }

        async fn function_tools(&self) -> Vec<FunctionTool> {
            self.tools.clone()
        }
    }

    #[tokio::test]
    async fn test_prompt_section_empty_without_tools() {
        let exec = ToolExecutor::new(Arc::new(EchoInvoker { tools: vec![] }));
        assert_eq!(exec.prompt_section().await, "");
    }

    #[tokio::test]
    async fn test_prompt_section_lists_tools_and_execute_forwards() {
        let tool = FunctionTool::new("echo", "回显输入", serde_json::json!({"type": "object"}));
        let exec = ToolExecutor::new(Arc::new(EchoInvoker { tools: vec![tool] }));

        let section = exec.prompt_section().await;
        assert!(section.contains("- echo: 回显输入"));
        assert!(section.contains("\"tool\""));

        let out = exec
            .execute(&ToolCall {
                tool: "echo".to_string(),
                args: serde_json::json!({"text": "hi"}),
            })
            .await;
        assert_eq!(out, "echo <- {\"text\":\"hi\"}");
    }
}
