//! 工具服务器错误
//!
//! 只在 mcp 模块内部流转：ToolServerManager 按服务器粒度捕获并记录日志，
//! 工具调用的错误最终转成描述文本交给模型。

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum McpError {
    #[error("failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport closed")]
    Closed,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool reported error: {0}")]
    ToolReported(String),
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        McpError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_second_timeout_is_reported_exactly() {
        let err = McpError::Timeout {
            method: "initialize".to_string(),
            timeout: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "request 'initialize' timed out after 200ms");
    }
}
