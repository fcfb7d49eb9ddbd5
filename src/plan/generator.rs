//! 文本生成端口：PlanExecutor 只通过 TextGenerator 与模型交互
//!
//! LlmGenerator 把 (PromptKind, 变量) 渲染为提示词后交给 LlmClient；测试中可替换为按 PromptKind 脚本化的实现。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message, TokenStream};

use super::prompts::{PromptKind, PromptTemplates, PromptVars};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 一次性生成完整文本
    async fn generate(&self, kind: PromptKind, vars: &PromptVars) -> Result<String, AgentError>;

    /// 流式生成；默认把 generate 的结果作为单个分片返回
    async fn generate_stream(
        &self,
        kind: PromptKind,
        vars: &PromptVars,
    ) -> Result<TokenStream, AgentError> {
        let text = self.generate(kind, vars).await?;
        Ok(Box::pin(stream::iter(vec![Ok(text)])))
    }
}

/// 基于 LlmClient 的生成器
pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
    templates: PromptTemplates,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, templates: PromptTemplates) -> Self {
        Self { llm, templates }
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    fn messages(&self, kind: PromptKind, vars: &PromptVars) -> Vec<Message> {
        vec![Message::user(self.templates.render(kind, vars))]
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(&self, kind: PromptKind, vars: &PromptVars) -> Result<String, AgentError> {
        tracing::debug!(prompt = kind.as_str(), "generate");
        let text = self.llm.complete(&self.messages(kind, vars)).await?;
        Ok(text)
    }

    async fn generate_stream(
        &self,
        kind: PromptKind,
        vars: &PromptVars,
    ) -> Result<TokenStream, AgentError> {
        tracing::debug!(prompt = kind.as_str(), "generate_stream");
        let stream = self.llm.complete_stream(&self.messages(kind, vars)).await?;
        Ok(stream)
    }
}
