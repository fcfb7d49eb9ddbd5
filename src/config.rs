//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__EXECUTOR__MODEL=deepseek-chat`）。
//! 三段：[app]、[executor]（规划执行器，含五个提示词模板）、[[tool_servers]]（子进程工具服务器）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::deepseek_api_key;
use crate::plan::PromptTemplates;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub executor: ExecutorConfig,
    pub tool_servers: Vec<ToolServerConfig>,
}

/// [app] 段：应用名、提示词目录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 提示词覆盖目录：存在 planner.txt / executor.txt / replanner.txt / decomposer.txt / judge.txt 时替换默认模板
    pub prompts_dir: Option<PathBuf>,
}

/// [executor] 段：模型、采样参数、重规划 / 子任务分解策略与提示词模板
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    /// 不序列化：写回配置文件或通过接口返回时不泄露密钥
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 单次 LLM 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 可重试错误（超时 / 限流 / 网络）的最大重试次数
    pub max_retries: u32,
    pub enable_replanning: bool,
    /// 累计失败步骤数达到该值时触发重规划
    pub replan_threshold: usize,
    pub enable_subtask_decomposition: bool,
    /// 子任务最大深度（顶层步骤为 0）
    pub max_subtask_depth: usize,
    /// 启发式无法确定时是否请 LLM 判断是否需要分解
    pub use_ai_judgment: bool,
    /// 单个步骤内最多工具调用轮数
    pub max_tool_rounds: usize,
    /// 执行步骤时是否推送增量文本（StepDelta 事件）
    pub stream_step_output: bool,
    pub prompts: PromptTemplates,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: 2000,
            request_timeout_secs: 60,
            max_retries: 2,
            enable_replanning: true,
            replan_threshold: 2,
            enable_subtask_decomposition: true,
            max_subtask_depth: 2,
            use_ai_judgment: false,
            max_tool_rounds: 3,
            stream_step_output: false,
            prompts: PromptTemplates::default(),
        }
    }
}

impl ExecutorConfig {
    /// 调用任何 LLM 之前的同步校验：模型标识、凭据、阈值
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::ConfigError(
                "model identifier is required".to_string(),
            ));
        }
        if !self.provider.eq_ignore_ascii_case("mock") && self.resolved_api_key().is_none() {
            return Err(AgentError::ConfigError(format!(
                "API key is required for provider '{}'",
                self.provider
            )));
        }
        if self.replan_threshold == 0 {
            return Err(AgentError::ConfigError(
                "replan_threshold must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AgentError::ConfigError(format!(
                "temperature {} out of range [0, 2]",
                self.temperature
            )));
        }
        Ok(())
    }

    /// 配置中的 api_key 优先，其次按 provider 读取环境变量
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Some(key.to_string());
        }
        match self.provider.to_lowercase().as_str() {
            "deepseek" => deepseek_api_key(None),
            _ => std::env::var("OPENAI_API_KEY").ok(),
        }
    }
}

/// [[tool_servers]] 条目：一个子进程工具服务器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs", rename = "timeout")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_tool_timeout_secs() -> u64 {
    60
}

impl ToolServerConfig {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            timeout_secs: default_tool_timeout_secs(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
///
/// 加载后若 [app].prompts_dir 指向存在的目录，用其中的模板文件覆盖提示词。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    if let Some(dir) = cfg.app.prompts_dir.clone() {
        cfg.executor.prompts.load_overrides(&dir);
    }
    Ok(cfg)
}

/// 将配置写回 TOML 文件（api_key 不会写出）
pub fn save_config(path: &Path, cfg: &AppConfig) -> Result<(), AgentError> {
    let text = toml::to_string_pretty(cfg)
        .map_err(|e| AgentError::ConfigError(format!("serialize config: {}", e)))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::ConfigError(format!("create {}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, text)
        .map_err(|e| AgentError::ConfigError(format!("write {}: {}", path.display(), e)))
}
