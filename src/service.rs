//! 计划服务：计划的增删查、执行、配置与工具服务器管理的统一入口（CLI 与 Web 共用）

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{ExecutorConfig, ToolServerConfig};
use crate::core::AgentError;
use crate::llm::create_llm_from_config;
use crate::mcp::{Tagged, ToolDescriptor, ToolServerManager};
use crate::plan::{
    EventSender, ExecutionPlan, LlmGenerator, PlanExecutor, PlanStatus, PlanStore, PlanSummary,
    TextGenerator,
};

pub struct PlanService {
    store: PlanStore,
    executor: RwLock<Arc<PlanExecutor>>,
    tools: Arc<ToolServerManager>,
    /// 固定的生成器（测试或嵌入场景）；为 None 时按配置构建 LLM
    fixed_generator: Option<Arc<dyn TextGenerator>>,
}

impl PlanService {
    /// 按配置构建 LLM 生成器
    pub fn new(config: ExecutorConfig, tools: Arc<ToolServerManager>) -> Result<Self, AgentError> {
        let executor = build_executor(None, config, &tools)?;
        Ok(Self {
            store: PlanStore::new(),
            executor: RwLock::new(Arc::new(executor)),
            tools,
            fixed_generator: None,
        })
    }

    /// 使用给定的生成器（配置更新时保留该生成器，只替换策略参数）
    pub fn with_generator(
        generator: Arc<dyn TextGenerator>,
        config: ExecutorConfig,
        tools: Arc<ToolServerManager>,
    ) -> Self {
        let executor =
            PlanExecutor::new(Arc::clone(&generator), config).with_tools(tools.clone());
        Self {
            store: PlanStore::new(),
            executor: RwLock::new(Arc::new(executor)),
            tools,
            fixed_generator: Some(generator),
        }
    }

    async fn executor(&self) -> Arc<PlanExecutor> {
        Arc::clone(&*self.executor.read().await)
    }

    pub async fn create_plan(&self, goal: &str) -> Result<ExecutionPlan, AgentError> {
        let plan = self.executor().await.create_plan(goal).await?;
        self.store.put(plan.clone()).await;
        Ok(plan)
    }

    /// 执行已创建的计划；只有 planning 状态的计划可以执行。执行期间使用开始时的执行器快照
    pub async fn execute_plan(
        &self,
        id: &str,
        events: Option<&EventSender>,
        cancel: CancellationToken,
    ) -> Result<ExecutionPlan, AgentError> {
        let mut plan = self
            .store
            .get(id)
            .await
            .ok_or_else(|| AgentError::PlanNotFound(id.to_string()))?;
        if plan.status != PlanStatus::Planning {
            return Err(AgentError::InvalidPlanState {
                id: id.to_string(),
                status: plan.status.to_string(),
            });
        }

        plan.status = PlanStatus::Executing;
        if !self.store.update(plan.clone()).await {
            return Err(AgentError::PlanNotFound(id.to_string()));
        }

        let executor = self.executor().await;
        executor.execute_plan(&mut plan, events, &cancel).await;
        if !self.store.update(plan.clone()).await {
            tracing::info!(plan_id = %plan.id, "plan deleted during execution, result not stored");
        }
        Ok(plan)
    }

    pub async fn get_plan(&self, id: &str) -> Option<ExecutionPlan> {
        self.store.get(id).await
    }

    /// 计划摘要，按创建时间倒序
    pub async fn list_plans(&self) -> Vec<PlanSummary> {
        self.store.summaries().await
    }

    pub async fn delete_plan(&self, id: &str) -> bool {
        self.store.remove(id).await
    }

    pub async fn config(&self) -> ExecutorConfig {
        self.executor().await.config().clone()
    }

    /// 先校验再替换执行器；正在执行的计划继续使用旧执行器
    pub async fn set_config(&self, config: ExecutorConfig) -> Result<(), AgentError> {
        config.validate()?;
        let executor = build_executor(self.fixed_generator.clone(), config, &self.tools)?;
        *self.executor.write().await = Arc::new(executor);
        tracing::info!("executor config updated");
        Ok(())
    }

    pub async fn update_tool_servers(&self, configs: Vec<ToolServerConfig>) {
        self.tools.reinitialize(configs).await;
    }

    pub async fn tool_descriptors(&self) -> Vec<Tagged<ToolDescriptor>> {
        self.tools.tool_descriptors().await
    }

    pub fn tool_manager(&self) -> &Arc<ToolServerManager> {
        &self.tools
    }
}

fn build_executor(
    generator: Option<Arc<dyn TextGenerator>>,
    config: ExecutorConfig,
    tools: &Arc<ToolServerManager>,
) -> Result<PlanExecutor, AgentError> {
    let generator = match generator {
        Some(g) => g,
        None => {
            let llm = create_llm_from_config(&config)?;
            Arc::new(LlmGenerator::new(llm, config.prompts.clone()))
        }
    };
    Ok(PlanExecutor::new(generator, config).with_tools(tools.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> ExecutorConfig {
        ExecutorConfig {
            provider: "mock".to_string(),
            ..ExecutorConfig::default()
        }
    }

    fn service() -> PlanService {
        PlanService::new(mock_config(), Arc::new(ToolServerManager::stdio())).unwrap()
    }

    #[tokio::test]
    async fn test_create_execute_with_mock_llm() {
        let svc = service();
        let plan = svc.create_plan("写一段自我介绍").await.unwrap();
        assert_eq!(plan.steps.len(), 2);

        let done = svc
            .execute_plan(&plan.id, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.status, PlanStatus::Completed);
        assert_eq!(svc.get_plan(&plan.id).await.unwrap().status, PlanStatus::Completed);

        // 已执行的计划不能再次执行
        let again = svc.execute_plan(&plan.id, None, CancellationToken::new()).await;
        assert!(matches!(again, Err(AgentError::InvalidPlanState { .. })));
    }

    /// 执行器调用时通知测试方，并等待放行
    struct GatedGenerator {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl TextGenerator for GatedGenerator {
        async fn generate(
            &self,
            kind: crate::plan::PromptKind,
            _vars: &crate::plan::PromptVars,
        ) -> Result<String, AgentError> {
            match kind {
                crate::plan::PromptKind::Planner => Ok("步骤1: 唯一的步骤".to_string()),
                _ => {
                    self.started.notify_one();
                    self.release.notified().await;
                    Ok("完成【无需分解】".to_string())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_plan_deleted_during_execution_stays_deleted() {
        let gen = Arc::new(GatedGenerator {
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let svc = Arc::new(PlanService::with_generator(
            gen.clone(),
            mock_config(),
            Arc::new(ToolServerManager::stdio()),
        ));
        let plan = svc.create_plan("目标").await.unwrap();

        let running = {
            let svc = Arc::clone(&svc);
            let id = plan.id.clone();
            tokio::spawn(async move { svc.execute_plan(&id, None, CancellationToken::new()).await })
        };
        gen.started.notified().await;
        assert!(svc.delete_plan(&plan.id).await);
        gen.release.notify_one();

        let done = running.await.unwrap().unwrap();
        assert_eq!(done.status, PlanStatus::Completed);
        assert!(svc.get_plan(&plan.id).await.is_none());
        assert!(svc.list_plans().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let svc = service();
        let err = svc
            .execute_plan("missing", None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::PlanNotFound(_)));
        assert!(!svc.delete_plan("missing").await);
    }

    #[tokio::test]
    async fn test_set_config_validates_first() {
        let svc = service();
        let bad = ExecutorConfig {
            replan_threshold: 0,
            ..mock_config()
        };
        assert!(matches!(
            svc.set_config(bad).await,
            Err(AgentError::ConfigError(_))
        ));
        assert_eq!(svc.config().await.replan_threshold, 2);

        let good = ExecutorConfig {
            max_subtask_depth: 1,
            ..mock_config()
        };
        svc.set_config(good).await.unwrap();
        assert_eq!(svc.config().await.max_subtask_depth, 1);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let config = ExecutorConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: Some(String::new()),
            ..ExecutorConfig::default()
        };
        // OPENAI_API_KEY 可能存在于环境中，只在未设置时断言
        if std::env::var("OPENAI_API_KEY").is_err() {
            let err = PlanService::new(config, Arc::new(ToolServerManager::stdio())).err();
            assert!(matches!(err, Some(AgentError::ConfigError(_))));
        }
    }
}
