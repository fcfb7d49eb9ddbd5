//! 编排层错误类型
//!
//! 步骤 / 子任务失败记录在 PlanStep.error 上，不中止计划；
//! 只有创建计划时的 LLM 失败与配置错误会直接返回给调用方。

use thiserror::Error;

use crate::llm::LlmError;
use crate::mcp::McpError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Tool server error: {0}")]
    ToolServer(#[from] McpError),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Plan {id} is already {status}")]
    InvalidPlanState { id: String, status: String },

    #[error("Step execution failed: {0}")]
    StepFailed(String),

    #[error("Cancelled")]
    Cancelled,
}
