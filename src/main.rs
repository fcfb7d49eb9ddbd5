//! Hive 命令行入口
//!
//! 用法：`hive [--config <path>] <目标>`
//! 加载配置 -> 启动工具服务器 -> 生成计划 -> 逐步执行并打印进度 -> 清理子进程。Ctrl+C 在下一个步骤边界停止执行。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use hive::core::{ShutdownCoordinator, ShutdownManager, ToolServerCleanup};
use hive::plan::{PlanEvent, StepStatus};
use hive::{load_config, observability, PlanService, ToolServerManager};
use tokio::sync::mpsc;

struct CliArgs {
    config: Option<PathBuf>,
    goal: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("用法: hive [--config <path>] <目标>");
                std::process::exit(0);
            }
            _ => words.push(arg),
        }
    }
    let goal = words.join(" ").trim().to_string();
    if goal.is_empty() {
        bail!("missing goal, usage: hive [--config <path>] <目标>");
    }
    Ok(CliArgs { config, goal })
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "待执行",
        StepStatus::Executing => "执行中",
        StepStatus::Completed => "完成",
        StepStatus::Failed => "失败",
    }
}

fn print_event(ev: &PlanEvent) {
    match ev {
        PlanEvent::StepUpdate { step, parent_id } => {
            let indent = if parent_id.is_some() { "    " } else { "" };
            println!("{}[{}] {}", indent, status_label(step.status), step.description);
            if let Some(err) = &step.error {
                println!("{}  错误: {}", indent, err);
            }
        }
        PlanEvent::StepDelta { text, .. } => {
            print!("{}", text);
        }
        PlanEvent::Replanned { after_index, steps } => {
            println!("↻ 第 {} 步之后重新规划为 {} 个步骤:", after_index + 1, steps.len());
            for (i, s) in steps.iter().enumerate() {
                println!("  {}. {}", i + 1, s.description);
            }
        }
        PlanEvent::Cancelled => println!("执行已取消"),
        PlanEvent::PlanFinished { status, .. } => println!("计划结束: {}", status),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = parse_args()?;

    let cfg = load_config(args.config).context("Failed to load config")?;

    let tools = Arc::new(ToolServerManager::stdio());
    tools.initialize(cfg.tool_servers.clone()).await;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(ToolServerCleanup::new(Arc::clone(&tools)));

    let result = run(&args.goal, cfg.executor, Arc::clone(&tools), &shutdown).await;
    coordinator.run_cleanup().await;
    result
}

async fn run(
    goal: &str,
    executor: hive::ExecutorConfig,
    tools: Arc<ToolServerManager>,
    shutdown: &ShutdownManager,
) -> anyhow::Result<()> {
    let service = PlanService::new(executor, tools).context("Failed to create plan service")?;

    let plan = service
        .create_plan(goal)
        .await
        .context("Failed to create plan")?;
    println!("目标: {}", plan.goal);
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  步骤{}: {}", i + 1, step.description);
    }
    println!();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            print_event(&ev);
        }
    });

    let finished = service
        .execute_plan(&plan.id, Some(&tx), shutdown.token().child_token())
        .await
        .context("Failed to execute plan")?;
    drop(tx);
    let _ = printer.await;

    println!();
    for (i, step) in finished.steps.iter().enumerate() {
        if let Some(result) = &step.result {
            println!("步骤{}结果:\n{}\n", i + 1, result);
        }
    }
    let stats = service.tool_manager().stats().await;
    tracing::info!(
        attempted = stats.attempted,
        discovered = stats.discovered,
        callable = stats.callable,
        "tool servers"
    );
    Ok(())
}
