//! Hive Web 管理接口
//!
//! - GET  /api/health
//! - GET  /api/plans                 计划摘要列表（新的在前）
//! - POST /api/plans                 {"goal": "..."} 创建计划
//! - GET  /api/plans/:id             计划详情
//! - DELETE /api/plans/:id
//! - POST /api/plans/:id/execute     执行计划，SSE 推送 PlanEvent（JSON）；客户端断开即取消
//! - GET  /api/config / PUT /api/config   执行器配置（api_key 不回显）
//! - GET  /api/tools                 已发现的工具
//! - PUT  /api/tool-servers          替换工具服务器配置并重新初始化
//!
//! 端口：HIVE_WEB_PORT，默认 8080。

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post, put},
    Json, Router,
};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use hive::config::{load_config, save_config, AppConfig, ExecutorConfig, ToolServerConfig};
use hive::core::{AgentError, ShutdownCoordinator, ShutdownManager, ToolServerCleanup};
use hive::mcp::{ManagerStats, Tagged, ToolDescriptor, ToolServerManager};
use hive::plan::{ExecutionPlan, PlanStatus, PlanSummary};
use hive::{observability, PlanService};

const DEFAULT_PORT: u16 = 8080;

struct AppState {
    service: Arc<PlanService>,
    app_config: RwLock<AppConfig>,
    /// 配置写回路径；None 时只更新内存
    config_path: Option<PathBuf>,
    shutdown: Arc<ShutdownManager>,
}

type ApiError = (StatusCode, String);

fn api_error(e: AgentError) -> ApiError {
    let status = match &e {
        AgentError::PlanNotFound(_) => StatusCode::NOT_FOUND,
        AgentError::InvalidPlanState { .. } => StatusCode::CONFLICT,
        AgentError::ConfigError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// HIVE_CONFIG 指定的文件，否则存在时使用 config/default.toml
fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("HIVE_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let default = PathBuf::from("config/default.toml");
    default.exists().then_some(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = resolve_config_path();
    let cfg = match load_config(config_path.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load config, using defaults: {}", e);
            AppConfig::default()
        }
    };

    let tools = Arc::new(ToolServerManager::stdio());
    tools.initialize(cfg.tool_servers.clone()).await;
    let service = Arc::new(PlanService::new(cfg.executor.clone(), Arc::clone(&tools))?);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(ToolServerCleanup::new(Arc::clone(&tools)));

    let state = Arc::new(AppState {
        service,
        app_config: RwLock::new(cfg),
        config_path,
        shutdown: Arc::clone(&shutdown),
    });

    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/plans", get(api_plans_list).post(api_plans_create))
        .route("/api/plans/:id", get(api_plan_get).delete(api_plan_delete))
        .route("/api/plans/:id/execute", post(api_plan_execute))
        .route("/api/config", get(api_config_get).put(api_config_put))
        .route("/api/tools", get(api_tools_list))
        .route("/api/tool-servers", put(api_tool_servers_put))
        .with_state(state);

    let port = std::env::var("HIVE_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Hive Web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
        .await?;

    coordinator.run_cleanup().await;
    Ok(())
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    goal: String,
}

/// GET /api/plans
async fn api_plans_list(State(state): State<Arc<AppState>>) -> Json<Vec<PlanSummary>> {
    Json(state.service.list_plans().await)
}

/// POST /api/plans
async fn api_plans_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<ExecutionPlan>), ApiError> {
    let goal = req.goal.trim();
    if goal.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "goal is required".to_string()));
    }
    let plan = state.service.create_plan(goal).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// GET /api/plans/:id
async fn api_plan_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionPlan>, ApiError> {
    state
        .service
        .get_plan(&id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(AgentError::PlanNotFound(id)))
}

/// DELETE /api/plans/:id
async fn api_plan_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.service.delete_plan(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// POST /api/plans/:id/execute：SSE 推送执行事件
async fn api_plan_execute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError>
{
    let plan = state
        .service
        .get_plan(&id)
        .await
        .ok_or_else(|| api_error(AgentError::PlanNotFound(id.clone())))?;
    if plan.status != PlanStatus::Planning {
        return Err(api_error(AgentError::InvalidPlanState {
            id,
            status: plan.status.to_string(),
        }));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = state.shutdown.token().child_token();
    // 流被丢弃（客户端断开）时取消执行
    let guard = cancel.clone().drop_guard();

    let service = Arc::clone(&state.service);
    tokio::spawn(async move {
        if let Err(e) = service.execute_plan(&id, Some(&tx), cancel).await {
            tracing::warn!(plan_id = %id, "plan execution failed: {}", e);
        }
    });

    let event_stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let ev = rx.recv().await?;
        let data = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
        Some((Ok(Event::default().data(data)), (rx, guard)))
    });
    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// GET /api/config
async fn api_config_get(State(state): State<Arc<AppState>>) -> Json<ExecutorConfig> {
    Json(state.service.config().await)
}

/// PUT /api/config：未提供 api_key 时沿用当前密钥；校验通过后替换执行器并写回配置文件
async fn api_config_put(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<ExecutorConfig>,
) -> Result<Json<ExecutorConfig>, ApiError> {
    if req.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        req.api_key = state.service.config().await.api_key;
    }
    state
        .service
        .set_config(req.clone())
        .await
        .map_err(api_error)?;

    let mut app_config = state.app_config.write().await;
    app_config.executor = req.clone();
    if let Some(path) = &state.config_path {
        if let Err(e) = save_config(path, &app_config) {
            tracing::warn!(path = %path.display(), "failed to persist config: {}", e);
        }
    }
    Ok(Json(req))
}

#[derive(Serialize)]
struct ToolsResponse {
    tools: Vec<Tagged<ToolDescriptor>>,
    stats: ManagerStats,
}

/// GET /api/tools
async fn api_tools_list(State(state): State<Arc<AppState>>) -> Json<ToolsResponse> {
    let tools = state.service.tool_descriptors().await;
    let stats = state.service.tool_manager().stats().await;
    Json(ToolsResponse { tools, stats })
}

/// PUT /api/tool-servers
async fn api_tool_servers_put(
    State(state): State<Arc<AppState>>,
    Json(configs): Json<Vec<ToolServerConfig>>,
) -> Json<ToolsResponse> {
    state.service.update_tool_servers(configs.clone()).await;

    let mut app_config = state.app_config.write().await;
    app_config.tool_servers = configs;
    if let Some(path) = &state.config_path {
        if let Err(e) = save_config(path, &app_config) {
            tracing::warn!(path = %path.display(), "failed to persist config: {}", e);
        }
    }
    drop(app_config);

    api_tools_list(State(state)).await
}
