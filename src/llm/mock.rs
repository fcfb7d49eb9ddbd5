//! Mock LLM 客户端（用于本地试跑与测试，无需 API）
//!
//! 取最后一条 User 消息：若是规划 / 重规划提示，返回两步计划；否则回显并附带「无需分解」标记，
//! 便于离线跑通 创建计划 -> 执行 的完整流程。

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, Message, Role, TokenStream};
use crate::plan::NO_DECOMPOSITION_MARKER;

/// 流式输出时每段字符数
const CHUNK_CHARS: usize = 8;

#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn reply(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if last_user.contains("步骤1:") || last_user.contains("步骤1：") {
            return "步骤1: 梳理目标与约束\n步骤2: 完成目标并汇总结果".to_string();
        }
        let preview: String = last_user.chars().take(60).collect();
        format!("Mock 回复：{}\n{}", preview, NO_DECOMPOSITION_MARKER)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(Self::reply(messages))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let chars: Vec<char> = Self::reply(messages).chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
