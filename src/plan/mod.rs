//! 规划 / 执行 / 重规划引擎
//!
//! - **types**: ExecutionPlan / PlanStep / 状态
//! - **parser**: `步骤N:` / `子任务N:` 文本解析
//! - **judge**: 子任务分解判定（标记 + 启发式）
//! - **prompts**: 五个提示词模板
//! - **generator**: TextGenerator 端口与 LLM 实现
//! - **executor**: PlanExecutor 主流程
//! - **events**: 执行过程事件
//! - **store**: 内存计划存储

pub mod events;
pub mod executor;
pub mod generator;
pub mod judge;
pub mod parser;
pub mod prompts;
pub mod store;
pub mod types;

pub use events::{EventSender, PlanEvent};
pub use executor::PlanExecutor;
pub use generator::{LlmGenerator, TextGenerator};
pub use judge::{
    heuristic_needs_decomposition, is_affirmative, marker_decision, NEEDS_DECOMPOSITION_MARKER,
    NO_DECOMPOSITION_MARKER,
};
pub use parser::{parse_steps, StepLabel};
pub use prompts::{prompt_vars, PromptKind, PromptTemplates, PromptVars};
pub use store::PlanStore;
pub use types::{ExecutionPlan, PlanId, PlanStatus, PlanStep, PlanSummary, StepStatus};
