//! 工具服务器管理器
//!
//! - initialize：并发启动所有已启用的服务器，单个失败只记日志
//! - fetch_capabilities：握手 + 列出工具 / 资源 / 提示词，结果冻结缓存；并发调用只触发一次发现
//! - call_tool：按「工具名 -> 服务器」路由表找到所属服务器，带该服务器配置的超时调用，结果总是文本
//! - reinitialize：关闭全部连接、清空缓存、按新配置重新启动
//!
//! 服务器粒度的失败在这里被捕获并记录，从不抛出管理器边界。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::client::McpClient;
use super::error::McpError;
use super::transport::{ServerTransport, StdioLauncher, TransportEvent, TransportLauncher};
use super::types::{Capabilities, FunctionTool, ManagerStats, Tagged, ToolDescriptor};
use crate::config::ToolServerConfig;
use crate::tools::ToolInvoker;

/// 发现阶段单个服务器的握手超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 缺省 path 参数时补 "." 的工具
const PATH_DEFAULT_TOOLS: &[&str] = &["list_directory", "directory_tree"];

/// 一个存活的服务器连接
struct ToolServerConnection {
    config: ToolServerConfig,
    client: McpClient,
    observer: JoinHandle<()>,
}

impl ToolServerConnection {
    fn transport(&self) -> &Arc<dyn ServerTransport> {
        self.client.transport()
    }
}

pub struct ToolServerManager {
    launcher: Arc<dyn TransportLauncher>,
    connect_timeout: Duration,
    configs: RwLock<Vec<ToolServerConfig>>,
    connections: RwLock<Vec<ToolServerConnection>>,
    capabilities: RwLock<Option<Arc<Capabilities>>>,
    discovery: Mutex<()>,
    attempted: AtomicUsize,
}

impl ToolServerManager {
    pub fn new(launcher: Arc<dyn TransportLauncher>) -> Self {
        Self {
            launcher,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            configs: RwLock::new(Vec::new()),
            connections: RwLock::new(Vec::new()),
            capabilities: RwLock::new(None),
            discovery: Mutex::new(()),
            attempted: AtomicUsize::new(0),
        }
    }

    /// 以 stdio 子进程方式启动服务器
    pub fn stdio() -> Self {
        Self::new(Arc::new(StdioLauncher))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub async fn configs(&self) -> Vec<ToolServerConfig> {
        self.configs.read().await.clone()
    }

    /// 启动所有已启用的服务器；之后每个成功启动的服务器持有一个连接
    pub async fn initialize(&self, configs: Vec<ToolServerConfig>) {
        let _guard = self.discovery.lock().await;
        self.launch_all(configs).await;
        *self.capabilities.write().await = None;
    }

    /// 调用方需持有 discovery 锁
    async fn launch_all(&self, configs: Vec<ToolServerConfig>) {
        *self.configs.write().await = configs.clone();

        let enabled: Vec<ToolServerConfig> = configs.into_iter().filter(|c| c.enabled).collect();
        self.attempted.store(enabled.len(), Ordering::SeqCst);
        tracing::info!("Starting {} tool servers", enabled.len());

        let launches = join_all(enabled.iter().map(|c| self.launcher.launch(c))).await;

        let mut connections = Vec::new();
        for (config, launched) in enabled.into_iter().zip(launches) {
            match launched {
                Ok(transport) => {
                    tracing::info!(server_id = %config.id, command = %config.command, "tool server started");
                    let observer = spawn_observer(config.id.clone(), transport.subscribe());
                    let client = McpClient::new(&config.id, transport, self.connect_timeout);
                    connections.push(ToolServerConnection {
                        config,
                        client,
                        observer,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        server_id = %config.id,
                        command = %config.command,
                        args = ?config.args,
                        config = ?config,
                        "failed to start tool server: {}",
                        e
                    );
                }
            }
        }

        self.connections.write().await.extend(connections);
    }

    /// 发现所有服务器的能力；已有缓存时直接返回
    pub async fn fetch_capabilities(&self) -> Arc<Capabilities> {
        if let Some(caps) = self.capabilities.read().await.as_ref() {
            return Arc::clone(caps);
        }

        let _guard = self.discovery.lock().await;
        if let Some(caps) = self.capabilities.read().await.as_ref() {
            return Arc::clone(caps);
        }

        let clients: Vec<McpClient> = self
            .connections
            .read()
            .await
            .iter()
            .map(|c| c.client.clone())
            .collect();

        let mut caps = Capabilities::default();
        for client in &clients {
            let server_id = client.server_id().to_string();
            match tokio::time::timeout(self.connect_timeout, client.connect()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(server_id = %server_id, "tool server handshake failed: {}", e);
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        server_id = %server_id,
                        "tool server handshake timed out after {:?}",
                        self.connect_timeout
                    );
                    continue;
                }
            }

            match client.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        caps.tools.push(Tagged {
                            server_id: server_id.clone(),
                            item: tool,
                        });
                    }
                }
                Err(e) => tracing::warn!(server_id = %server_id, "tools/list failed: {}", e),
            }
            match client.list_resources().await {
                Ok(resources) => {
                    for resource in resources {
                        caps.resources.push(Tagged {
                            server_id: server_id.clone(),
                            item: resource,
                        });
                    }
                }
                Err(e) => tracing::debug!(server_id = %server_id, "resources/list failed: {}", e),
            }
            match client.list_prompts().await {
                Ok(prompts) => {
                    for prompt in prompts {
                        caps.prompts.push(Tagged {
                            server_id: server_id.clone(),
                            item: prompt,
                        });
                    }
                }
                Err(e) => tracing::debug!(server_id = %server_id, "prompts/list failed: {}", e),
            }
            caps.discovered.push(server_id);
        }

        let (routes, function_tools) = build_routes(&caps.tools);
        caps.routes = routes;
        caps.function_tools = function_tools;
        tracing::info!(
            servers = caps.discovered.len(),
            tools = caps.function_tools.len(),
            resources = caps.resources.len(),
            prompts = caps.prompts.len(),
            "tool discovery finished"
        );

        let caps = Arc::new(caps);
        *self.capabilities.write().await = Some(Arc::clone(&caps));
        caps
    }

    /// 调用工具；任何失败都转成描述文本
    pub async fn call_tool(&self, name: &str, args: Value) -> String {
        match self.try_call_tool(name, args).await {
            Ok(text) => text,
            Err(McpError::UnknownTool(_)) => format!("Error: unknown tool '{}'", name),
            Err(McpError::Timeout { timeout, .. }) => {
                format!("Error: tool '{}' timed out after {:?}", name, timeout)
            }
            Err(McpError::ToolReported(text)) => {
                format!("Error: tool '{}' reported an error: {}", name, text)
            }
            Err(e) => format!("Error: tool '{}' failed: {}", name, e),
        }
    }

    pub async fn try_call_tool(&self, name: &str, args: Value) -> Result<String, McpError> {
        let caps = self.fetch_capabilities().await;
        let server_id = caps
            .owner_of(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        let (client, timeout) = {
            let connections = self.connections.read().await;
            let conn = connections
                .iter()
                .find(|c| c.config.id == server_id)
                .ok_or(McpError::Closed)?;
            (conn.client.clone(), conn.config.timeout())
        };

        let args = apply_default_args(name, args);
        tracing::debug!(server_id = %server_id, tool = %name, "calling tool");
        let result = client.call_tool(name, args, timeout).await.map_err(|e| {
            tracing::warn!(server_id = %server_id, tool = %name, "tool call failed: {}", e);
            e
        })?;

        let text = result.text();
        if result.is_error {
            Err(McpError::ToolReported(text))
        } else {
            Ok(text)
        }
    }

    /// 关闭全部连接、清空缓存后按新配置重新启动。
    /// 全程持有 discovery 锁：期间的 fetch_capabilities 等待新一代连接就绪后再发现
    pub async fn reinitialize(&self, configs: Vec<ToolServerConfig>) {
        tracing::info!("Reinitializing tool servers");
        let _guard = self.discovery.lock().await;
        self.close_all().await;
        self.launch_all(configs).await;
        *self.capabilities.write().await = None;
    }

    /// 关闭所有客户端与传输；单个关闭失败只记日志
    pub async fn cleanup(&self) {
        let _guard = self.discovery.lock().await;
        self.close_all().await;
    }

    /// 调用方需持有 discovery 锁
    async fn close_all(&self) {
        let connections: Vec<ToolServerConnection> =
            self.connections.write().await.drain(..).collect();
        *self.capabilities.write().await = None;

        for conn in &connections {
            if let Err(e) = conn.client.close().await {
                tracing::warn!(server_id = %conn.config.id, "failed to close tool server: {}", e);
            }
        }
        for conn in connections {
            conn.observer.abort();
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        let attempted = self.attempted.load(Ordering::SeqCst);
        let Some(caps) = self.capabilities.read().await.clone() else {
            return ManagerStats {
                attempted,
                ..ManagerStats::default()
            };
        };
        let connections = self.connections.read().await;
        let callable = caps
            .discovered
            .iter()
            .filter(|id| {
                connections
                    .iter()
                    .any(|c| &c.config.id == *id && !c.transport().is_closed())
            })
            .count();
        ManagerStats {
            attempted,
            discovered: caps.discovered.len(),
            callable,
        }
    }

    /// 已发现的工具（带服务器 id）
    pub async fn tool_descriptors(&self) -> Vec<Tagged<ToolDescriptor>> {
        self.fetch_capabilities().await.tools.clone()
    }

    pub async fn function_tools(&self) -> Vec<FunctionTool> {
        self.fetch_capabilities().await.function_tools.clone()
    }
}

#[async_trait]
impl ToolInvoker for ToolServerManager {
    async fn call_tool(&self, name: &str, args: Value) -> String {
        ToolServerManager::call_tool(self, name, args).await
    }

    async fn function_tools(&self) -> Vec<FunctionTool> {
        ToolServerManager::function_tools(self).await
    }
}

/// 观察任务：只记录传输事件，不向上传播
fn spawn_observer(
    server_id: String,
    mut events: broadcast::Receiver<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TransportEvent::Error(e)) => {
                    tracing::warn!(server_id = %server_id, "tool server transport error: {}", e);
                }
                Ok(TransportEvent::Closed) => {
                    tracing::info!(server_id = %server_id, "tool server transport closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// 路由表与函数描述；重名工具按配置顺序第一个服务器胜出
fn build_routes(tools: &[Tagged<ToolDescriptor>]) -> (HashMap<String, String>, Vec<FunctionTool>) {
    let mut routes: HashMap<String, String> = HashMap::new();
    let mut function_tools = Vec::new();
    for tagged in tools {
        let name = &tagged.item.name;
        if let Some(owner) = routes.get(name) {
            tracing::warn!(
                tool = %name,
                owner = %owner,
                duplicate = %tagged.server_id,
                "duplicate tool name ignored"
            );
            continue;
        }
        routes.insert(name.clone(), tagged.server_id.clone());
        function_tools.push(FunctionTool::from(&tagged.item));
    }
    (routes, function_tools)
}

/// 部分文件系统工具缺省 path 时补 "."
fn apply_default_args(name: &str, args: Value) -> Value {
    if !PATH_DEFAULT_TOOLS.contains(&name) {
        return args;
    }
    let mut map = match args {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => return other,
    };
    let missing = match map.get("path") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };
    if missing {
        map.insert("path".to_string(), Value::String(".".to_string()));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_path_fixup() {
        assert_eq!(
            apply_default_args("list_directory", json!({})),
            json!({"path": "."})
        );
        assert_eq!(
            apply_default_args("directory_tree", json!({"path": "  "})),
            json!({"path": "."})
        );
        assert_eq!(
            apply_default_args("list_directory", Value::Null),
            json!({"path": "."})
        );
        assert_eq!(
            apply_default_args("list_directory", json!({"path": "src"})),
            json!({"path": "src"})
        );
        assert_eq!(apply_default_args("read_file", json!({})), json!({}));
    }

    #[test]
    fn test_first_provider_wins_duplicates() {
        let tool = |name: &str, server: &str| Tagged {
            server_id: server.to_string(),
            item: ToolDescriptor {
                name: name.to_string(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            },
        };
        let (routes, functions) =
            build_routes(&[tool("read", "a"), tool("write", "a"), tool("read", "b")]);
        assert_eq!(routes["read"], "a");
        assert_eq!(routes["write"], "a");
        assert_eq!(functions.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_manager_reports_unknown_tool() {
        let manager = ToolServerManager::stdio();
        manager.initialize(Vec::new()).await;
        let out = manager.call_tool("nope", json!({})).await;
        assert_eq!(out, "Error: unknown tool 'nope'");
        assert_eq!(manager.stats().await, ManagerStats::default());
    }
}
