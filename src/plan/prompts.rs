//! 提示词模板：规划 / 执行 / 重规划 / 子任务分解 / 分解判断
//!
//! 模板中的 `{name}` 占位符在 render 时一次性替换（替换进来的值里即使含花括号也不会被二次展开）。
//! 每个模板都可以通过配置 [executor.prompts] 或 prompts_dir 下的 `<kind>.txt` 单独覆盖。

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// 模板变量
pub type PromptVars = HashMap<String, String>;

/// 由 (key, value) 列表构造模板变量
pub fn prompt_vars<const N: usize>(pairs: [(&str, &str); N]) -> PromptVars {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// 模板标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Planner,
    Executor,
    Replanner,
    Decomposer,
    Judge,
}

impl PromptKind {
    pub const ALL: [PromptKind; 5] = [
        PromptKind::Planner,
        PromptKind::Executor,
        PromptKind::Replanner,
        PromptKind::Decomposer,
        PromptKind::Judge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Planner => "planner",
            PromptKind::Executor => "executor",
            PromptKind::Replanner => "replanner",
            PromptKind::Decomposer => "decomposer",
            PromptKind::Judge => "judge",
        }
    }
}

const DEFAULT_PLANNER: &str = "你是一个任务规划助手。请把下面的目标拆解为按顺序执行的步骤，每个步骤一行，格式必须为：
步骤1: 描述
步骤2: 描述
……
步骤数量控制在 2 到 8 个，每个步骤应当可以独立执行并产出结果。只输出步骤列表，不要输出其他内容。

目标：{goal}";

const DEFAULT_EXECUTOR: &str = "你是一个任务执行助手，正在为总体目标执行其中一个步骤。

总体目标：{goal}
当前步骤：{step}

之前步骤的结果：
{previous_results}
{tools}{tool_results}
请直接完成当前步骤并给出结果。
如果当前步骤过于复杂、无法一次完成，请在回答末尾单独一行写上【需要分解】；如果已经完成，请在末尾单独一行写上【无需分解】。";

const DEFAULT_REPLANNER: &str = "你是一个任务规划助手。原计划在执行中出现了多次失败，请根据已有进展重新规划剩余的步骤。

目标：{goal}

原计划：
{original_plan}

已完成的步骤：
{completed_steps}

失败的步骤：
{failed_steps}

失败原因：{failures}

请只输出接下来需要执行的新步骤（不要重复已完成的步骤），格式必须为：
步骤1: 描述
步骤2: 描述";

const DEFAULT_DECOMPOSER: &str = "你是一个任务分解助手。下面这个步骤较为复杂，请把它拆分为若干按顺序执行的子任务。

总体目标：{goal}
需要分解的步骤：{step}
初步执行结果：
{result}

之前步骤的结果：
{previous_results}

请按以下格式输出子任务，每行一个：
子任务1: 描述
子任务2: 描述
如果你认为该步骤不需要分解，只输出【无需分解】。";

const DEFAULT_JUDGE: &str = "请判断下面这个步骤的执行结果是否说明该步骤过于复杂、需要拆分为多个子任务再执行。

步骤：{step}
执行结果：
{result}

只回答「是」或「否」。";

fn default_planner() -> String {
    DEFAULT_PLANNER.to_string()
}

fn default_executor() -> String {
    DEFAULT_EXECUTOR.to_string()
}

fn default_replanner() -> String {
    DEFAULT_REPLANNER.to_string()
}

fn default_decomposer() -> String {
    DEFAULT_DECOMPOSER.to_string()
}

fn default_judge() -> String {
    DEFAULT_JUDGE.to_string()
}

/// 五个提示词模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplates {
    #[serde(default = "default_planner")]
    pub planner: String,
    #[serde(default = "default_executor")]
    pub executor: String,
    #[serde(default = "default_replanner")]
    pub replanner: String,
    #[serde(default = "default_decomposer")]
    pub decomposer: String,
    #[serde(default = "default_judge")]
    pub judge: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            planner: default_planner(),
            executor: default_executor(),
            replanner: default_replanner(),
            decomposer: default_decomposer(),
            judge: default_judge(),
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder regex"))
}

impl PromptTemplates {
    pub fn get(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Planner => &self.planner,
            PromptKind::Executor => &self.executor,
            PromptKind::Replanner => &self.replanner,
            PromptKind::Decomposer => &self.decomposer,
            PromptKind::Judge => &self.judge,
        }
    }

    pub fn set(&mut self, kind: PromptKind, template: impl Into<String>) {
        let slot = match kind {
            PromptKind::Planner => &mut self.planner,
            PromptKind::Executor => &mut self.executor,
            PromptKind::Replanner => &mut self.replanner,
            PromptKind::Decomposer => &mut self.decomposer,
            PromptKind::Judge => &mut self.judge,
        };
        *slot = template.into();
    }

    /// 从目录读取 `<kind>.txt` 覆盖对应模板；文件不存在或为空时保留原模板
    pub fn load_overrides(&mut self, dir: &Path) {
        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.txt", kind.as_str()));
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::info!(prompt = kind.as_str(), path = %path.display(), "prompt template overridden");
                    self.set(kind, text);
                }
                _ => {}
            }
        }
    }

    /// 渲染模板：已知变量替换为值，未知占位符原样保留
    pub fn render(&self, kind: PromptKind, vars: &PromptVars) -> String {
        placeholder_pattern()
            .replace_all(self.get(kind), |caps: &Captures| match vars.get(&caps[1]) {
                Some(v) => v.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
