//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、按配置构建客户端

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use deepseek::{create_deepseek_client, deepseek_api_key, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, SamplingOptions, TokenUsage};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient, TokenStream};

use crate::config::ExecutorConfig;
use crate::core::AgentError;

/// 根据执行器配置选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock），并包上重试层。
/// 先校验配置：缺少模型或凭据时直接返回 ConfigError，不发起任何调用。
pub fn create_llm_from_config(cfg: &ExecutorConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    cfg.validate()?;

    let provider = cfg.provider.to_lowercase();
    if provider == "mock" {
        tracing::warn!("Using Mock LLM");
        return Ok(Arc::new(MockLlmClient));
    }

    let options = SamplingOptions {
        temperature: cfg.temperature,
        max_tokens: cfg.max_tokens,
        request_timeout: Duration::from_secs(cfg.request_timeout_secs),
    };
    let api_key = cfg.resolved_api_key().ok_or_else(|| {
        AgentError::ConfigError(format!("missing API key for provider '{}'", cfg.provider))
    })?;

    let client: Arc<dyn LlmClient> = if provider == "deepseek" {
        tracing::info!("Using DeepSeek LLM ({})", cfg.model);
        Arc::new(create_deepseek_client(
            &cfg.model,
            &api_key,
            cfg.base_url.as_deref(),
            options,
        ))
    } else {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
        Arc::new(
            OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, Some(&api_key))
                .with_options(options),
        )
    };

    Ok(Arc::new(RetryingLlmClient::new(
        client,
        RetryConfig::default().with_max_retries(cfg.max_retries),
    )))
}
