//! 工具服务器启动参数解析
//!
//! - 命令为 `npx` 且 PATH 上能找到 `bunx` 时改用 `bunx`，找不到则保持原命令
//! - 环境变量：继承当前进程环境，再叠加配置中的 env；改用 bunx 时去掉代理相关变量
//! - 参数：npx 保证恰好一个 `-y`（`--yes` 视同）；bunx 去掉 `-y` / `--yes`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::ToolServerConfig;

const NPX: &str = "npx";
const BUNX: &str = "bunx";

/// 改用 bunx 时剔除的代理变量
const PROXY_VARS: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
    "no_proxy",
    "npm_config_proxy",
    "npm_config_https_proxy",
];

/// 最终用于 spawn 的命令行
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// 是否由 npx 替换为 bunx
    pub substituted: bool,
}

impl LaunchSpec {
    /// 按当前 PATH 与进程环境解析
    pub fn resolve(config: &ToolServerConfig) -> Self {
        let bunx_available = find_in_path(BUNX).is_some();
        Self::resolve_with(config, bunx_available, std::env::vars())
    }

    pub fn resolve_with(
        config: &ToolServerConfig,
        bunx_available: bool,
        inherited: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let substituted = is_runner(&config.command, NPX) && bunx_available;
        let program = if substituted {
            BUNX.to_string()
        } else {
            config.command.clone()
        };
        let args = normalize_args(&program, &config.args);
        let env = compose_env(inherited, &config.env, substituted);
        Self {
            program,
            args,
            env,
            substituted,
        }
    }
}

/// 命令（可能带路径与 .cmd/.exe 后缀）是否就是指定的 runner
fn is_runner(command: &str, runner: &str) -> bool {
    Path::new(command)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(runner))
        .unwrap_or(false)
}

fn is_yes_flag(arg: &str) -> bool {
    arg == "-y" || arg == "--yes"
}

pub fn normalize_args(program: &str, args: &[String]) -> Vec<String> {
    let rest = args.iter().filter(|a| !is_yes_flag(a)).cloned();
    if is_runner(program, NPX) {
        std::iter::once("-y".to_string()).chain(rest).collect()
    } else if is_runner(program, BUNX) {
        rest.collect()
    } else {
        args.to_vec()
    }
}

pub fn compose_env(
    inherited: impl IntoIterator<Item = (String, String)>,
    overrides: &HashMap<String, String>,
    strip_proxy: bool,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = inherited.into_iter().collect();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    if strip_proxy {
        for key in PROXY_VARS {
            env.remove(*key);
        }
    }
    env
}

/// 在 PATH 中查找可执行文件
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    let candidates: Vec<String> = if cfg!(windows) {
        vec![format!("{name}.exe"), format!("{name}.cmd"), name.to_string()]
    } else {
        vec![name.to_string()]
    };
    std::env::split_paths(&paths).find_map(|dir| {
        candidates
            .iter()
            .map(|c| dir.join(c))
            .find(|p| p.is_file())
    })
}
