//! 子进程工具服务器（JSON-RPC over stdio）
//!
//! - **launch**: 命令 / 环境变量 / 参数解析（npx -> bunx 替换）
//! - **transport**: ServerTransport 抽象与 stdio 实现
//! - **client**: 握手、分页列表、工具调用
//! - **manager**: ToolServerManager（启动、发现、路由、重新初始化）

pub mod client;
pub mod error;
pub mod launch;
pub mod manager;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use error::McpError;
pub use launch::{find_in_path, LaunchSpec};
pub use manager::{ToolServerManager, DEFAULT_CONNECT_TIMEOUT};
pub use transport::{
    ServerTransport, StdioLauncher, StdioTransport, TransportEvent, TransportLauncher,
};
pub use types::{
    CallToolResult, Capabilities, ContentBlock, FunctionDef, FunctionTool, ManagerStats,
    PromptArgument, PromptDescriptor, ResourceDescriptor, Tagged, ToolDescriptor,
};
