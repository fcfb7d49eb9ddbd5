//! 计划执行器：创建计划、逐步执行、子任务分解、失败后重规划
//!
//! 执行严格串行。每个步骤：执行提示词（可多轮工具调用） -> 判断是否需要分解 -> 分解则串行执行子任务并合成结果。
//! 步骤失败只记录在步骤上并计数，不中止计划；累计失败达到阈值时尝试重规划，
//! 新步骤接在当前步骤之后，原先剩余的步骤被丢弃。
//! 取消 token 在每个步骤 / 子任务开始前检查；取消后剩余步骤保持 pending。

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::core::AgentError;
use crate::tools::{parse_tool_call, ToolExecutor, ToolInvoker};

use super::events::{send_event, EventSender, PlanEvent};
use super::generator::TextGenerator;
use super::judge::{heuristic_needs_decomposition, is_affirmative, marker_decision};
use super::parser::{parse_steps, StepLabel};
use super::prompts::{prompt_vars, PromptKind, PromptVars};
use super::types::{ExecutionPlan, PlanStatus, PlanStep};

/// 占位：没有可填内容时写入提示词
const NONE_TEXT: &str = "（无）";

/// 单个步骤执行时的上下文
struct StepContext<'a> {
    goal: &'a str,
    previous_results: &'a str,
    parent_id: Option<&'a str>,
    depth: usize,
    events: Option<&'a EventSender>,
    cancel: &'a CancellationToken,
}

pub struct PlanExecutor {
    generator: Arc<dyn TextGenerator>,
    config: ExecutorConfig,
    tools: Option<ToolExecutor>,
}

impl PlanExecutor {
    pub fn new(generator: Arc<dyn TextGenerator>, config: ExecutorConfig) -> Self {
        Self {
            generator,
            config,
            tools: None,
        }
    }

    /// 挂载工具调用端口；步骤输出为 JSON 工具调用时会执行工具并把结果回填给模型
    pub fn with_tools(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(ToolExecutor::new(invoker));
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// 根据目标生成计划（状态 planning）。配置错误在调用模型之前返回；模型失败直接返回错误
    pub async fn create_plan(&self, goal: &str) -> Result<ExecutionPlan, AgentError> {
        self.config.validate()?;

        let output = self
            .generator
            .generate(PromptKind::Planner, &prompt_vars([("goal", goal)]))
            .await?;
        let steps = parse_steps(&output, StepLabel::Step);
        if steps.is_empty() {
            tracing::warn!(goal = %goal, "planner output contains no steps");
        }

        let plan = ExecutionPlan::new(goal, steps);
        tracing::info!(plan_id = %plan.id, steps = plan.steps.len(), "plan created");
        Ok(plan)
    }

    /// 执行计划直到结束或取消；结束时按「至少一个步骤完成即 completed」确定终态
    pub async fn execute_plan(
        &self,
        plan: &mut ExecutionPlan,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) {
        plan.status = PlanStatus::Executing;
        tracing::info!(plan_id = %plan.id, goal = %plan.goal, "plan execution started");

        let goal = plan.goal.clone();
        let mut previous_results: Vec<String> = Vec::new();
        let mut failures = 0usize;
        let mut cancelled = false;
        let mut index = 0usize;

        while index < plan.steps.len() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let prior = join_or_none(&previous_results);
            let step = &mut plan.steps[index];
            step.mark_executing();
            send_event(
                events,
                PlanEvent::StepUpdate {
                    step: step.clone(),
                    parent_id: None,
                },
            );

            let ctx = StepContext {
                goal: &goal,
                previous_results: &prior,
                parent_id: None,
                depth: 0,
                events,
                cancel,
            };
            let outcome = self.run_step(step, &ctx).await;
            let mut failed = false;
            match outcome {
                Ok(result) => {
                    tracing::info!(plan_id = %plan.id, step = index + 1, "step completed");
                    previous_results.push(format!("步骤{}结果: {}", index + 1, result));
                    step.mark_completed(result);
                }
                Err(AgentError::Cancelled) => {
                    step.mark_failed(AgentError::Cancelled.to_string());
                    cancelled = true;
                }
                Err(e) => {
                    tracing::warn!(plan_id = %plan.id, step = index + 1, "step failed: {}", e);
                    step.mark_failed(e.to_string());
                    failures += 1;
                    failed = true;
                }
            }
            send_event(
                events,
                PlanEvent::StepUpdate {
                    step: step.clone(),
                    parent_id: None,
                },
            );
            if cancelled {
                break;
            }

            if failed && self.config.enable_replanning && failures >= self.config.replan_threshold {
                if let Some(descriptions) = self.replan_steps(plan, index).await {
                    let new_steps: Vec<PlanStep> =
                        descriptions.into_iter().map(PlanStep::new).collect();
                    plan.steps.truncate(index + 1);
                    plan.steps.extend(new_steps.iter().cloned());
                    failures = 0;
                    previous_results.clear();
                    tracing::info!(
                        plan_id = %plan.id,
                        after_index = index,
                        steps = new_steps.len(),
                        "plan replanned"
                    );
                    send_event(
                        events,
                        PlanEvent::Replanned {
                            after_index: index,
                            steps: new_steps,
                        },
                    );
                }
            }

            index += 1;
        }

        if cancelled {
            tracing::info!(plan_id = %plan.id, "plan execution cancelled");
            send_event(events, PlanEvent::Cancelled);
        }

        plan.status = plan.final_status();
        plan.completed_at = Some(Utc::now());
        tracing::info!(
            plan_id = %plan.id,
            status = %plan.status,
            completed = plan.completed_steps(),
            failed = plan.failed_steps(),
            "plan execution finished"
        );
        send_event(
            events,
            PlanEvent::PlanFinished {
                plan_id: plan.id.clone(),
                status: plan.status,
            },
        );
    }

    /// 串行执行 parent 的子任务，返回合成文本；失败的子任务以失败行写入合成结果，后续子任务照常执行。
    /// 取消时返回 Cancelled，未执行的子任务保持 pending
    pub async fn execute_subtasks(
        &self,
        parent: &mut PlanStep,
        goal: &str,
        prior_results: &str,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
        depth: usize,
    ) -> Result<String, AgentError> {
        let parent_id = parent.id.clone();
        let parent_desc = parent.description.clone();
        let mut done: Vec<String> = Vec::new();
        let mut lines: Vec<String> = Vec::new();

        for (i, sub) in parent.subtasks.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let context = format!(
                "{}\n父任务: {}\n已完成的子任务: {}",
                prior_results,
                parent_desc,
                join_or_none(&done)
            );
            sub.mark_executing();
            send_event(
                events,
                PlanEvent::StepUpdate {
                    step: sub.clone(),
                    parent_id: Some(parent_id.clone()),
                },
            );

            let ctx = StepContext {
                goal,
                previous_results: &context,
                parent_id: Some(&parent_id),
                depth,
                events,
                cancel,
            };
            match self.run_step(sub, &ctx).await {
                Ok(result) => {
                    done.push(format!("{} -> {}", sub.description, result));
                    lines.push(format!("子任务{}（{}）: {}", i + 1, sub.description, result));
                    sub.mark_completed(result);
                }
                Err(AgentError::Cancelled) => {
                    sub.mark_failed(AgentError::Cancelled.to_string());
                    send_event(
                        events,
                        PlanEvent::StepUpdate {
                            step: sub.clone(),
                            parent_id: Some(parent_id.clone()),
                        },
                    );
                    return Err(AgentError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(parent = %parent_desc, subtask = i + 1, "subtask failed: {}", e);
                    lines.push(format!("子任务{}（{}）失败: {}", i + 1, sub.description, e));
                    sub.mark_failed(e.to_string());
                }
            }
            send_event(
                events,
                PlanEvent::StepUpdate {
                    step: sub.clone(),
                    parent_id: Some(parent_id.clone()),
                },
            );
        }

        Ok(lines.join("\n"))
    }

    /// 根据已完成 / 失败情况重新规划当前步骤之后的步骤；解析不出步骤或出错时返回 None
    pub async fn replan_steps(
        &self,
        plan: &ExecutionPlan,
        current_index: usize,
    ) -> Option<Vec<String>> {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut failures = Vec::new();
        let mut original = Vec::new();

        for (i, step) in plan.steps.iter().enumerate() {
            original.push(format!("步骤{}: {}", i + 1, step.description));
            if step.is_completed() {
                completed.push(format!(
                    "步骤{}: {} -> {}",
                    i + 1,
                    step.description,
                    step.result.as_deref().unwrap_or_default()
                ));
            } else if step.is_failed() {
                let error = step.error.as_deref().unwrap_or("未知错误");
                failed.push(format!("步骤{}: {}（错误: {}）", i + 1, step.description, error));
                failures.push(error.to_string());
            }
        }

        let original_plan = original.join("\n");
        let completed_steps = join_or_none(&completed);
        let failed_steps = join_or_none(&failed);
        let failures = if failures.is_empty() {
            NONE_TEXT.to_string()
        } else {
            failures.join("；")
        };
        let vars = prompt_vars([
            ("goal", plan.goal.as_str()),
            ("original_plan", original_plan.as_str()),
            ("completed_steps", completed_steps.as_str()),
            ("failed_steps", failed_steps.as_str()),
            ("failures", failures.as_str()),
        ]);

        match self.generator.generate(PromptKind::Replanner, &vars).await {
            Ok(output) => {
                let steps = parse_steps(&output, StepLabel::Step);
                if steps.is_empty() {
                    tracing::warn!(plan_id = %plan.id, current_index, "replanner returned no steps");
                    None
                } else {
                    Some(steps)
                }
            }
            Err(e) => {
                tracing::warn!(plan_id = %plan.id, current_index, "replanning failed: {}", e);
                None
            }
        }
    }

    /// 执行单个步骤 / 子任务，返回其结果文本（子任务路径下为合成文本）
    fn run_step<'a>(
        &'a self,
        step: &'a mut PlanStep,
        ctx: &'a StepContext<'a>,
    ) -> BoxFuture<'a, Result<String, AgentError>> {
        async move {
            if !step.subtasks.is_empty() {
                return self
                    .execute_subtasks(
                        step,
                        ctx.goal,
                        ctx.previous_results,
                        ctx.events,
                        ctx.cancel,
                        ctx.depth + 1,
                    )
                    .await;
            }

            let result = self.execute_prompt(step, ctx).await?;

            if !self.config.enable_subtask_decomposition || ctx.depth >= self.config.max_subtask_depth {
                return Ok(result);
            }
            let needs = self.needs_decomposition(&step.description, &result).await;
            step.needs_subtasks = Some(needs);
            if !needs {
                return Ok(result);
            }

            let subtasks = self.decompose(step, ctx, &result).await?;
            if subtasks.is_empty() {
                return Ok(result);
            }
            tracing::info!(step = %step.description, count = subtasks.len(), "step decomposed");
            step.subtasks = subtasks.into_iter().map(PlanStep::new).collect();
            send_event(
                ctx.events,
                PlanEvent::StepUpdate {
                    step: step.clone(),
                    parent_id: ctx.parent_id.map(str::to_string),
                },
            );
            self.execute_subtasks(
                step,
                ctx.goal,
                ctx.previous_results,
                ctx.events,
                ctx.cancel,
                ctx.depth + 1,
            )
            .await
        }
        .boxed()
    }

    /// 执行提示词；挂载了工具时最多 max_tool_rounds 轮「调用工具 -> 回填结果 -> 再生成」
    async fn execute_prompt(
        &self,
        step: &PlanStep,
        ctx: &StepContext<'_>,
    ) -> Result<String, AgentError> {
        let tools_section = match &self.tools {
            Some(tools) => tools.prompt_section().await,
            None => String::new(),
        };
        let mut vars = prompt_vars([
            ("goal", ctx.goal),
            ("step", step.description.as_str()),
            ("previous_results", ctx.previous_results),
            ("tools", tools_section.as_str()),
            ("tool_results", ""),
        ]);

        let mut observations: Vec<String> = Vec::new();
        loop {
            let output = self.generate_step_output(&step.id, &vars, ctx.events).await?;

            let Some(tools) = &self.tools else {
                return Ok(output);
            };
            if observations.len() >= self.config.max_tool_rounds {
                return Ok(output);
            }
            let Some(call) = parse_tool_call(&output) else {
                return Ok(output);
            };

            tracing::info!(step = %step.description, tool = %call.tool, "step requested tool");
            let observation = tools.execute(&call).await;
            observations.push(format!("工具 {} 返回：\n{}", call.tool, observation));
            vars.insert(
                "tool_results".to_string(),
                format!("\n已获得的工具结果：\n{}\n", observations.join("\n\n")),
            );
        }
    }

    async fn generate_step_output(
        &self,
        step_id: &str,
        vars: &PromptVars,
        events: Option<&EventSender>,
    ) -> Result<String, AgentError> {
        if !self.config.stream_step_output {
            return self.generator.generate(PromptKind::Executor, vars).await;
        }

        let mut stream = self
            .generator
            .generate_stream(PromptKind::Executor, vars)
            .await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            send_event(
                events,
                PlanEvent::StepDelta {
                    step_id: step_id.to_string(),
                    text: chunk.clone(),
                },
            );
            text.push_str(&chunk);
        }
        Ok(text)
    }

    /// 是否需要分解：显式标记 > AI 判断（开启时）> 启发式
    async fn needs_decomposition(&self, description: &str, result: &str) -> bool {
        if let Some(decision) = marker_decision(result) {
            return decision;
        }
        if self.config.use_ai_judgment {
            let vars = prompt_vars([("step", description), ("result", result)]);
            match self.generator.generate(PromptKind::Judge, &vars).await {
                Ok(answer) => return is_affirmative(&answer),
                Err(e) => {
                    tracing::warn!(step = %description, "AI judgment failed, using heuristic: {}", e);
                }
            }
        }
        heuristic_needs_decomposition(result)
    }

    /// 请求子任务列表；模型拒绝分解时返回空列表
    async fn decompose(
        &self,
        step: &PlanStep,
        ctx: &StepContext<'_>,
        result: &str,
    ) -> Result<Vec<String>, AgentError> {
        let vars = prompt_vars([
            ("goal", ctx.goal),
            ("step", step.description.as_str()),
            ("result", result),
            ("previous_results", ctx.previous_results),
        ]);
        let output = self.generator.generate(PromptKind::Decomposer, &vars).await?;
        if marker_decision(&output) == Some(false) {
            return Ok(Vec::new());
        }
        Ok(parse_steps(&output, StepLabel::Subtask))
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        NONE_TEXT.to_string()
    } else {
        items.join("\n")
    }
}
