//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)

use crate::llm::{OpenAiClient, SamplingOptions};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 解析 DeepSeek API Key：显式传入优先，其次 `DEEPSEEK_API_KEY`，最后 `OPENAI_API_KEY`
pub fn deepseek_api_key(explicit: Option<&str>) -> Option<String> {
    explicit
        .filter(|k| !k.trim().is_empty())
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
}

/// 创建 DeepSeek 客户端；base_url 为空时使用官方端点
pub fn create_deepseek_client(
    model: &str,
    api_key: &str,
    base_url: Option<&str>,
    options: SamplingOptions,
) -> OpenAiClient {
    let model = if model.trim().is_empty() {
        DEEPSEEK_CHAT
    } else {
        model
    };
    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        model,
        Some(api_key),
    )
    .with_options(options)
}
