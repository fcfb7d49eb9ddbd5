//! Hive - Rust 任务编排层
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **mcp**: 子进程工具服务器的启动、发现与调用
//! - **observability**: 日志初始化
//! - **plan**: 规划 / 执行 / 重规划引擎
//! - **service**: 计划服务（CLI 与 Web 共用的管理入口）
//! - **tools**: 工具调用端口、Tool Call 解析与审计

pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod observability;
pub mod plan;
pub mod service;
pub mod tools;

pub use config::{load_config, AppConfig, ExecutorConfig, ToolServerConfig};
pub use core::AgentError;
pub use mcp::ToolServerManager;
pub use plan::{ExecutionPlan, PlanEvent, PlanExecutor, PlanStatus, PlanStep};
pub use service::PlanService;
