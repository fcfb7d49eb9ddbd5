//! 工具调用层
//!
//! 执行器只依赖 ToolInvoker：按名调用工具、列出可供 LLM 使用的函数描述。
//! ToolServerManager 是生产实现；ToolExecutor 在其上加审计日志与提示词渲染。

pub mod call;
pub mod executor;
pub mod schema;

use async_trait::async_trait;

use crate::mcp::FunctionTool;

pub use call::{parse_tool_call, ToolCall};
pub use executor::ToolExecutor;
pub use schema::tool_call_schema_json;

/// 工具调用端口
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// 调用工具；成功返回文本内容，未知工具 / 超时 / 调用错误返回描述性文本
    async fn call_tool(&self, name: &str, args: serde_json::Value) -> String;

    /// 当前可调用的工具（tool-calling 描述格式）
    async fn function_tools(&self) -> Vec<FunctionTool>;
}
